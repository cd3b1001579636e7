//! Route groups, one per tracker

pub mod alerts;
pub mod blocks;
pub mod consensus;
pub mod nodes;
pub mod peers;
pub mod validators;

use serde::Deserialize;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LimitParams {
    limit: Option<i64>,
}

impl LimitParams {
    pub(crate) fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WindowParams {
    hours: Option<i64>,
}

impl WindowParams {
    /// Trailing window, 24 hours unless asked otherwise.
    pub(crate) fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.hours.unwrap_or(24).clamp(1, 24 * 90))
    }
}
