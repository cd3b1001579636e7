//! JIO Network Monitor
//!
//! This crate tracks who participates in the JIO network and consensus:
//! reporting nodes, the peers they see, validators that never report
//! (phantoms), block production by visibility, and alerts when too much
//! stake goes dark. A poll orchestrator feeds the trackers on a fixed
//! cadence and a read-only REST API exposes what they store.

pub mod alerts;
pub mod api;
pub mod blocks;
pub mod cli;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod fetch;
pub mod inference;
pub mod models;
pub mod node_health;
pub mod peers;
pub mod poller;
pub mod trackers;
pub mod validators;

pub use error::{MonitorError, Result};
