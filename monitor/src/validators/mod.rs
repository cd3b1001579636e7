//! Validator visibility tracking

pub mod tracker;
pub mod transition;
pub mod visibility;

use serde::{Deserialize, Serialize};

use crate::models::Amount;

pub use tracker::{ValidatorProcessResult, ValidatorTracker};
pub use transition::{TransitionEvent, TransitionType, ValidatorTransition};
pub use visibility::{ConsensusVisibility, QuorumHealth};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ValidatorSource {
    /// Linked to a dashboard node that declares this baker id.
    Reporting,
    /// Only known from the chain: a phantom.
    ChainOnly,
}

impl ValidatorSource {
    pub fn data_completeness(self) -> f64 {
        match self {
            ValidatorSource::Reporting => 1.0,
            ValidatorSource::ChainOnly => 0.5,
        }
    }
}

/// Persisted validator joined with its visibility. Timestamps are Unix
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Validator {
    pub baker_id: i64,
    pub account_address: String,
    #[sqlx(try_from = "String")]
    pub equity_capital: Amount,
    #[sqlx(try_from = "String")]
    pub delegated_capital: Amount,
    #[sqlx(try_from = "String")]
    pub total_stake: Amount,
    #[sqlx(try_from = "String")]
    pub effective_stake: Amount,
    pub lottery_power: f64,
    pub baking_commission: f64,
    pub finalization_commission: f64,
    pub transaction_commission: f64,
    pub open_status: Option<String>,
    pub in_current_payday: bool,
    pub source: ValidatorSource,
    pub linked_peer_id: Option<String>,
    pub data_completeness: f64,
    pub state_transition_count: i64,
    pub first_observed: i64,
    pub last_chain_update: i64,
    pub blocks_24h: i64,
    pub blocks_7d: i64,
    pub last_block_height: Option<i64>,
    pub last_block_time: Option<i64>,
}

/// One row per call to the snapshot recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConsensusSnapshot {
    pub id: i64,
    pub timestamp: i64,
    pub total_validators: i64,
    pub visible_validators: i64,
    pub phantom_validators: i64,
    pub validator_coverage_pct: f64,
    #[sqlx(try_from = "String")]
    pub total_stake: Amount,
    #[sqlx(try_from = "String")]
    pub visible_stake: Amount,
    #[sqlx(try_from = "String")]
    pub phantom_stake: Amount,
    pub stake_visibility_pct: f64,
    pub quorum_health: QuorumHealth,
}
