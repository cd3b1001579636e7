//! Stake-weighted visibility and quorum health
//!
//! The alerting checks classify health through the same function, so the
//! two can never disagree about where the thresholds are.

use serde::{Deserialize, Serialize};

use crate::models::Amount;
use crate::validators::{Validator, ValidatorSource};

/// Stake visibility at or above this is healthy.
pub const HEALTHY_STAKE_VISIBILITY_PCT: f64 = 70.0;
/// Stake visibility at or above this (and below healthy) is degraded.
pub const DEGRADED_STAKE_VISIBILITY_PCT: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum QuorumHealth {
    Healthy,
    Degraded,
    Critical,
}

impl QuorumHealth {
    pub fn from_stake_visibility(pct: f64) -> QuorumHealth {
        if pct >= HEALTHY_STAKE_VISIBILITY_PCT {
            QuorumHealth::Healthy
        } else if pct >= DEGRADED_STAKE_VISIBILITY_PCT {
            QuorumHealth::Degraded
        } else {
            QuorumHealth::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuorumHealth::Healthy => "healthy",
            QuorumHealth::Degraded => "degraded",
            QuorumHealth::Critical => "critical",
        }
    }
}

/// `part / whole * 100`, or 0 when there is no whole.
pub fn percentage(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusVisibility {
    pub total_validators: i64,
    pub visible_validators: i64,
    pub phantom_validators: i64,
    pub validator_coverage_pct: f64,
    pub total_stake: Amount,
    pub visible_stake: Amount,
    pub phantom_stake: Amount,
    pub total_lottery_power: f64,
    pub visible_lottery_power: f64,
    pub stake_visibility_pct: f64,
    pub quorum_health: QuorumHealth,
}

impl ConsensusVisibility {
    /// Weighted by lottery power, not raw stake: lottery power is what
    /// actually decides block production.
    pub fn from_validators(validators: &[Validator]) -> ConsensusVisibility {
        let mut visible_validators = 0i64;
        let mut total_stake = 0u128;
        let mut visible_stake = 0u128;
        let mut total_lottery_power = 0.0;
        let mut visible_lottery_power = 0.0;

        for validator in validators {
            total_stake = total_stake.saturating_add(validator.total_stake.0);
            total_lottery_power += validator.lottery_power;

            if validator.source == ValidatorSource::Reporting {
                visible_validators += 1;
                visible_stake = visible_stake.saturating_add(validator.total_stake.0);
                visible_lottery_power += validator.lottery_power;
            }
        }

        let total_validators = validators.len() as i64;
        let stake_visibility_pct = percentage(visible_lottery_power, total_lottery_power);

        ConsensusVisibility {
            total_validators,
            visible_validators,
            phantom_validators: total_validators - visible_validators,
            validator_coverage_pct: percentage(visible_validators as f64, total_validators as f64),
            total_stake: Amount(total_stake),
            visible_stake: Amount(visible_stake),
            phantom_stake: Amount(total_stake - visible_stake),
            total_lottery_power,
            visible_lottery_power,
            stake_visibility_pct,
            quorum_health: QuorumHealth::from_stake_visibility(stake_visibility_pct),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_are_half_open() {
        assert_eq!(QuorumHealth::from_stake_visibility(100.0), QuorumHealth::Healthy);
        assert_eq!(QuorumHealth::from_stake_visibility(70.0), QuorumHealth::Healthy);
        assert_eq!(QuorumHealth::from_stake_visibility(69.999), QuorumHealth::Degraded);
        assert_eq!(QuorumHealth::from_stake_visibility(50.0), QuorumHealth::Degraded);
        assert_eq!(QuorumHealth::from_stake_visibility(49.999), QuorumHealth::Critical);
        assert_eq!(QuorumHealth::from_stake_visibility(0.0), QuorumHealth::Critical);
    }

    #[test]
    fn test_percentage_of_nothing() {
        assert_eq!(percentage(5.0, 0.0), 0.0);
        assert_eq!(percentage(1.0, 4.0), 25.0);
    }
}
