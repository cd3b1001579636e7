//! Database module for the monitor

pub mod schema;
pub mod connection;

pub use connection::Database;
pub use schema::*;

#[cfg(test)]
pub(crate) use connection::test_database;
