//! Forensic transition events
//!
//! Each kind carries its own evidence. The whole event is stored as JSON in
//! the `evidence` column so new kinds do not need schema changes.

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};
use crate::models::Amount;

/// Relative stake movement above which a change is logged.
pub const STAKE_CHANGE_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TransitionType {
    PhantomToVisible,
    VisibleToPhantom,
    StakeChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionEvent {
    PhantomToVisible {
        linked_peer_id: String,
    },
    VisibleToPhantom {
        /// Peer that stopped reporting this baker id.
        previous_peer_id: Option<String>,
    },
    StakeChanged {
        old_stake: Amount,
        new_stake: Amount,
        change_ratio: f64,
    },
}

impl TransitionEvent {
    pub fn transition_type(&self) -> TransitionType {
        match self {
            TransitionEvent::PhantomToVisible { .. } => TransitionType::PhantomToVisible,
            TransitionEvent::VisibleToPhantom { .. } => TransitionType::VisibleToPhantom,
            TransitionEvent::StakeChanged { .. } => TransitionType::StakeChanged,
        }
    }

    pub fn old_value(&self) -> String {
        match self {
            TransitionEvent::PhantomToVisible { .. } => "chain_only".to_string(),
            TransitionEvent::VisibleToPhantom { .. } => "reporting".to_string(),
            TransitionEvent::StakeChanged { old_stake, .. } => old_stake.to_string(),
        }
    }

    pub fn new_value(&self) -> String {
        match self {
            TransitionEvent::PhantomToVisible { .. } => "reporting".to_string(),
            TransitionEvent::VisibleToPhantom { .. } => "chain_only".to_string(),
            TransitionEvent::StakeChanged { new_stake, .. } => new_stake.to_string(),
        }
    }

    /// `Some` when the stake moved by more than [`STAKE_CHANGE_THRESHOLD`].
    /// A previous stake of zero has no ratio and is never reported.
    pub fn stake_change(old_stake: Amount, new_stake: Amount) -> Option<TransitionEvent> {
        let change_ratio = old_stake.change_ratio(new_stake)?;
        (change_ratio > STAKE_CHANGE_THRESHOLD).then_some(TransitionEvent::StakeChanged {
            old_stake,
            new_stake,
            change_ratio,
        })
    }
}

/// A persisted transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorTransition {
    pub id: i64,
    pub baker_id: i64,
    pub timestamp: i64,
    pub transition_type: TransitionType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub evidence: TransitionEvent,
}

#[derive(sqlx::FromRow)]
pub(crate) struct TransitionRow {
    pub id: i64,
    pub baker_id: i64,
    pub timestamp: i64,
    pub transition_type: TransitionType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub evidence: String,
}

impl TryFrom<TransitionRow> for ValidatorTransition {
    type Error = MonitorError;

    fn try_from(row: TransitionRow) -> Result<Self> {
        Ok(ValidatorTransition {
            id: row.id,
            baker_id: row.baker_id,
            timestamp: row.timestamp,
            transition_type: row.transition_type,
            old_value: row.old_value,
            new_value: row.new_value,
            evidence: serde_json::from_str(&row.evidence)?,
        })
    }
}
