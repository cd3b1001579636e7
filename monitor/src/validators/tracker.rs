//! Validator tracker
//!
//! Joins the chain's baker list with the dashboard nodes that declare a
//! baker id. A baker with a declaring node is visible; one without is a
//! phantom. Every change between the two, and every large stake move, is
//! appended to the transition log.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::database::Database;
use crate::error::{MonitorError, Result};
use crate::models::{ChainValidator, NodeSummary};
use crate::validators::transition::TransitionRow;
use crate::validators::{
    ConsensusSnapshot, ConsensusVisibility, TransitionEvent, Validator, ValidatorSource,
    ValidatorTransition,
};

const VALIDATOR_COLUMNS: &str = r#"
    baker_id, account_address, equity_capital, delegated_capital, total_stake,
    effective_stake, lottery_power, baking_commission, finalization_commission,
    transaction_commission, open_status, in_current_payday, source, linked_peer_id,
    data_completeness, state_transition_count, first_observed, last_chain_update,
    blocks_24h, blocks_7d, last_block_height, last_block_time
"#;

const TRANSITION_COLUMNS: &str =
    "id, baker_id, timestamp, transition_type, old_value, new_value, evidence";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorProcessResult {
    pub processed: usize,
    pub visible_count: usize,
    pub phantom_count: usize,
    pub new_validators: usize,
    pub visible_lottery_power: f64,
    pub phantom_lottery_power: f64,
    pub transitions: Vec<ValidatorTransition>,
    /// Chain entries rejected as malformed.
    pub errors: Vec<String>,
}

pub struct ValidatorTracker {
    pool: sqlx::SqlitePool,
    clock: Arc<dyn Clock>,
}

impl ValidatorTracker {
    pub fn new(database: &Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool: database.pool().clone(),
            clock,
        }
    }

    pub async fn process_validators(
        &self,
        chain_validators: &[ChainValidator],
        reporting_peers: &[NodeSummary],
    ) -> Result<ValidatorProcessResult> {
        // Last writer wins when two nodes claim the same baker id.
        let peers_by_baker: HashMap<u64, &str> = reporting_peers
            .iter()
            .filter_map(|node| node.consensus_baker_id.map(|id| (id, node.node_id.as_str())))
            .collect();

        let mut result = ValidatorProcessResult::default();

        for chain in chain_validators {
            if let Err(e) = validate(chain) {
                warn!(baker_id = chain.baker_id, "skipping validator: {}", e);
                result.errors.push(e.to_string());
                continue;
            }

            let linked_peer_id = peers_by_baker.get(&chain.baker_id).copied();
            let source = match linked_peer_id {
                Some(_) => ValidatorSource::Reporting,
                None => ValidatorSource::ChainOnly,
            };

            let events = match self.get_validator(chain.baker_id as i64).await? {
                Some(previous) => detect_transitions(&previous, chain, source, linked_peer_id),
                None => {
                    debug!(baker_id = chain.baker_id, source = ?source, "new validator");
                    result.new_validators += 1;
                    Vec::new()
                }
            };

            self.write_validator(chain, source, linked_peer_id, events.len() as i64).await?;

            for event in events {
                let transition = self.record_transition(chain.baker_id as i64, event).await?;
                info!(
                    baker_id = transition.baker_id,
                    transition = ?transition.transition_type,
                    "validator transition"
                );
                result.transitions.push(transition);
            }

            result.processed += 1;
            match source {
                ValidatorSource::Reporting => {
                    result.visible_count += 1;
                    result.visible_lottery_power += chain.lottery_power;
                }
                ValidatorSource::ChainOnly => {
                    result.phantom_count += 1;
                    result.phantom_lottery_power += chain.lottery_power;
                }
            }
        }

        info!(
            processed = result.processed,
            visible = result.visible_count,
            phantom = result.phantom_count,
            new = result.new_validators,
            transitions = result.transitions.len(),
            "validators processed"
        );

        Ok(result)
    }

    async fn write_validator(
        &self,
        chain: &ChainValidator,
        source: ValidatorSource,
        linked_peer_id: Option<&str>,
        transition_count: i64,
    ) -> Result<()> {
        let now = self.clock.now_millis();
        let effective_stake = chain.effective_stake.unwrap_or(chain.total_stake);

        sqlx::query(
            r#"
            INSERT INTO validators (
                baker_id, account_address, equity_capital, delegated_capital, total_stake,
                effective_stake, lottery_power, baking_commission, finalization_commission,
                transaction_commission, open_status, in_current_payday, source, linked_peer_id,
                data_completeness, state_transition_count, first_observed, last_chain_update
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0, ?16, ?16)
            ON CONFLICT (baker_id) DO UPDATE SET
                account_address = excluded.account_address,
                equity_capital = excluded.equity_capital,
                delegated_capital = excluded.delegated_capital,
                total_stake = excluded.total_stake,
                effective_stake = excluded.effective_stake,
                lottery_power = excluded.lottery_power,
                baking_commission = excluded.baking_commission,
                finalization_commission = excluded.finalization_commission,
                transaction_commission = excluded.transaction_commission,
                open_status = excluded.open_status,
                in_current_payday = excluded.in_current_payday,
                source = excluded.source,
                linked_peer_id = excluded.linked_peer_id,
                data_completeness = excluded.data_completeness,
                state_transition_count = validators.state_transition_count + ?17,
                last_chain_update = excluded.last_chain_update
            "#,
        )
        .bind(chain.baker_id as i64)
        .bind(&chain.account_address)
        .bind(chain.equity_capital.to_string())
        .bind(chain.delegated_capital.to_string())
        .bind(chain.total_stake.to_string())
        .bind(effective_stake.to_string())
        .bind(chain.lottery_power)
        .bind(chain.baking_commission)
        .bind(chain.finalization_commission)
        .bind(chain.transaction_commission)
        .bind(&chain.open_status)
        .bind(chain.in_current_payday)
        .bind(source)
        .bind(linked_peer_id)
        .bind(source.data_completeness())
        .bind(now)
        .bind(transition_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_transition(&self, baker_id: i64, event: TransitionEvent) -> Result<ValidatorTransition> {
        let timestamp = self.clock.now_millis();
        let transition_type = event.transition_type();
        let old_value = event.old_value();
        let new_value = event.new_value();
        let evidence = serde_json::to_string(&event)?;

        let id = sqlx::query(
            r#"
            INSERT INTO validator_transitions (
                baker_id, timestamp, transition_type, old_value, new_value, evidence
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(baker_id)
        .bind(timestamp)
        .bind(transition_type)
        .bind(&old_value)
        .bind(&new_value)
        .bind(&evidence)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(ValidatorTransition {
            id,
            baker_id,
            timestamp,
            transition_type,
            old_value: Some(old_value),
            new_value: Some(new_value),
            evidence: event,
        })
    }

    pub async fn get_validator(&self, baker_id: i64) -> Result<Option<Validator>> {
        let validator = sqlx::query_as::<_, Validator>(&format!(
            "SELECT {VALIDATOR_COLUMNS} FROM validators WHERE baker_id = ?"
        ))
        .bind(baker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(validator)
    }

    /// All validators, most influential first.
    pub async fn get_all_validators(&self) -> Result<Vec<Validator>> {
        let validators = sqlx::query_as::<_, Validator>(&format!(
            "SELECT {VALIDATOR_COLUMNS} FROM validators ORDER BY lottery_power DESC, baker_id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(validators)
    }

    pub async fn get_validators_by_source(&self, source: ValidatorSource) -> Result<Vec<Validator>> {
        let validators = sqlx::query_as::<_, Validator>(&format!(
            "SELECT {VALIDATOR_COLUMNS} FROM validators WHERE source = ? ORDER BY lottery_power DESC, baker_id"
        ))
        .bind(source)
        .fetch_all(&self.pool)
        .await?;

        Ok(validators)
    }

    pub async fn get_phantom_validators(&self) -> Result<Vec<Validator>> {
        self.get_validators_by_source(ValidatorSource::ChainOnly).await
    }

    pub async fn get_visible_validators(&self) -> Result<Vec<Validator>> {
        self.get_validators_by_source(ValidatorSource::Reporting).await
    }

    /// Transition log for one baker, oldest first.
    pub async fn get_validator_history(&self, baker_id: i64) -> Result<Vec<ValidatorTransition>> {
        let rows = sqlx::query_as::<_, TransitionRow>(&format!(
            "SELECT {TRANSITION_COLUMNS} FROM validator_transitions WHERE baker_id = ? ORDER BY timestamp, id"
        ))
        .bind(baker_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ValidatorTransition::try_from).collect()
    }

    pub async fn get_recent_transitions(&self, limit: i64) -> Result<Vec<ValidatorTransition>> {
        let rows = sqlx::query_as::<_, TransitionRow>(&format!(
            "SELECT {TRANSITION_COLUMNS} FROM validator_transitions ORDER BY timestamp DESC, id DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ValidatorTransition::try_from).collect()
    }

    pub async fn calculate_consensus_visibility(&self) -> Result<ConsensusVisibility> {
        let validators = self.get_all_validators().await?;
        Ok(ConsensusVisibility::from_validators(&validators))
    }

    pub async fn record_consensus_snapshot(&self) -> Result<ConsensusSnapshot> {
        let visibility = self.calculate_consensus_visibility().await?;
        let timestamp = self.clock.now_millis();

        let id = sqlx::query(
            r#"
            INSERT INTO consensus_snapshots (
                timestamp, total_validators, visible_validators, phantom_validators,
                validator_coverage_pct, total_stake, visible_stake, phantom_stake,
                stake_visibility_pct, quorum_health
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(timestamp)
        .bind(visibility.total_validators)
        .bind(visibility.visible_validators)
        .bind(visibility.phantom_validators)
        .bind(visibility.validator_coverage_pct)
        .bind(visibility.total_stake.to_string())
        .bind(visibility.visible_stake.to_string())
        .bind(visibility.phantom_stake.to_string())
        .bind(visibility.stake_visibility_pct)
        .bind(visibility.quorum_health)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(
            stake_visibility_pct = visibility.stake_visibility_pct,
            quorum_health = visibility.quorum_health.as_str(),
            "consensus snapshot recorded"
        );

        Ok(ConsensusSnapshot {
            id,
            timestamp,
            total_validators: visibility.total_validators,
            visible_validators: visibility.visible_validators,
            phantom_validators: visibility.phantom_validators,
            validator_coverage_pct: visibility.validator_coverage_pct,
            total_stake: visibility.total_stake,
            visible_stake: visibility.visible_stake,
            phantom_stake: visibility.phantom_stake,
            stake_visibility_pct: visibility.stake_visibility_pct,
            quorum_health: visibility.quorum_health,
        })
    }

    /// Most recent snapshots first.
    pub async fn get_consensus_history(&self, limit: i64) -> Result<Vec<ConsensusSnapshot>> {
        let snapshots = sqlx::query_as::<_, ConsensusSnapshot>(
            r#"
            SELECT
                id, timestamp, total_validators, visible_validators, phantom_validators,
                validator_coverage_pct, total_stake, visible_stake, phantom_stake,
                stake_visibility_pct, quorum_health
            FROM consensus_snapshots
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(snapshots)
    }
}

fn validate(chain: &ChainValidator) -> Result<()> {
    if !chain.lottery_power.is_finite() || !(0.0..=1.0).contains(&chain.lottery_power) {
        return Err(MonitorError::InvalidInput(format!(
            "baker {} has lottery power {} outside 0..=1",
            chain.baker_id, chain.lottery_power
        )));
    }
    if chain.baker_id > i64::MAX as u64 {
        return Err(MonitorError::InvalidInput(format!(
            "baker id {} out of range",
            chain.baker_id
        )));
    }
    Ok(())
}

fn detect_transitions(
    previous: &Validator,
    chain: &ChainValidator,
    source: ValidatorSource,
    linked_peer_id: Option<&str>,
) -> Vec<TransitionEvent> {
    let mut events = Vec::new();

    match (previous.source, source, linked_peer_id) {
        (ValidatorSource::ChainOnly, ValidatorSource::Reporting, Some(peer_id)) => {
            events.push(TransitionEvent::PhantomToVisible {
                linked_peer_id: peer_id.to_string(),
            });
        }
        (ValidatorSource::Reporting, ValidatorSource::ChainOnly, _) => {
            events.push(TransitionEvent::VisibleToPhantom {
                previous_peer_id: previous.linked_peer_id.clone(),
            });
        }
        _ => {}
    }

    if let Some(event) = TransitionEvent::stake_change(previous.total_stake, chain.total_stake) {
        events.push(event);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::database::test_database;
    use crate::models::Amount;
    use crate::validators::{QuorumHealth, TransitionType};
    use chrono::Duration;

    fn chain_validator(baker_id: u64, stake: u128, lottery_power: f64) -> ChainValidator {
        ChainValidator {
            baker_id,
            account_address: format!("addr-{baker_id}"),
            equity_capital: Amount(stake),
            delegated_capital: Amount::ZERO,
            total_stake: Amount(stake),
            lottery_power,
            ..Default::default()
        }
    }

    fn reporting_node(node_id: &str, baker_id: u64) -> NodeSummary {
        NodeSummary {
            node_id: node_id.to_string(),
            consensus_baker_id: Some(baker_id),
            consensus_running: true,
            ..Default::default()
        }
    }

    async fn tracker() -> (ValidatorTracker, Arc<ManualClock>) {
        let db = test_database().await;
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        (ValidatorTracker::new(&db, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_classification_and_counts() {
        let (tracker, _clock) = tracker().await;
        let chain = vec![
            chain_validator(1, 1_000, 0.4),
            chain_validator(2, 1_000, 0.35),
            chain_validator(3, 1_000, 0.25),
        ];
        let nodes = vec![reporting_node("node-a", 1), reporting_node("node-c", 3)];

        let result = tracker.process_validators(&chain, &nodes).await.unwrap();

        assert_eq!(result.processed, 3);
        assert_eq!(result.visible_count + result.phantom_count, result.processed);
        assert_eq!(result.visible_count, 2);
        assert_eq!(result.new_validators, 3);
        assert!(result.transitions.is_empty());
        let total: f64 = chain.iter().map(|v| v.lottery_power).sum();
        assert!((result.visible_lottery_power + result.phantom_lottery_power - total).abs() < 1e-9);

        let phantom = tracker.get_phantom_validators().await.unwrap();
        assert_eq!(phantom.len(), 1);
        assert_eq!(phantom[0].baker_id, 2);
        assert_eq!(phantom[0].data_completeness, 0.5);
        assert_eq!(phantom[0].linked_peer_id, None);

        let visible = tracker.get_validator(1).await.unwrap().unwrap();
        assert_eq!(visible.source, ValidatorSource::Reporting);
        assert_eq!(visible.linked_peer_id.as_deref(), Some("node-a"));
        assert_eq!(visible.data_completeness, 1.0);
    }

    #[tokio::test]
    async fn test_phantom_becomes_visible_once() {
        let (tracker, clock) = tracker().await;
        let chain = vec![chain_validator(7, 5_000, 0.2)];

        tracker.process_validators(&chain, &[]).await.unwrap();
        clock.advance(Duration::minutes(5));

        let result = tracker
            .process_validators(&chain, &[reporting_node("node-7", 7)])
            .await
            .unwrap();
        assert_eq!(result.transitions.len(), 1);
        assert_eq!(result.new_validators, 0);
        assert_eq!(result.transitions[0].transition_type, TransitionType::PhantomToVisible);
        assert_eq!(
            result.transitions[0].evidence,
            TransitionEvent::PhantomToVisible { linked_peer_id: "node-7".to_string() }
        );

        // Steady state produces nothing new.
        clock.advance(Duration::minutes(5));
        let again = tracker
            .process_validators(&chain, &[reporting_node("node-7", 7)])
            .await
            .unwrap();
        assert!(again.transitions.is_empty());

        let validator = tracker.get_validator(7).await.unwrap().unwrap();
        assert_eq!(validator.source, ValidatorSource::Reporting);
        assert_eq!(validator.state_transition_count, 1);
        assert_eq!(validator.first_observed, 1_700_000_000_000);
        assert_eq!(validator.last_chain_update, clock.now_millis());

        let history = tracker.get_validator_history(7).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_visible_to_phantom_with_stake_change() {
        let (tracker, clock) = tracker().await;

        tracker
            .process_validators(&[chain_validator(4, 1_000, 0.5)], &[reporting_node("node-4", 4)])
            .await
            .unwrap();
        clock.advance(Duration::minutes(5));

        let result = tracker
            .process_validators(&[chain_validator(4, 2_000, 0.5)], &[])
            .await
            .unwrap();

        let kinds: Vec<_> = result.transitions.iter().map(|t| t.transition_type).collect();
        assert_eq!(kinds, vec![TransitionType::VisibleToPhantom, TransitionType::StakeChanged]);
        assert_eq!(
            result.transitions[0].evidence,
            TransitionEvent::VisibleToPhantom { previous_peer_id: Some("node-4".to_string()) }
        );
        match &result.transitions[1].evidence {
            TransitionEvent::StakeChanged { change_ratio, old_stake, new_stake } => {
                assert_eq!(*change_ratio, 1.0);
                assert_eq!(*old_stake, Amount(1_000));
                assert_eq!(*new_stake, Amount(2_000));
            }
            other => panic!("unexpected evidence {other:?}"),
        }

        let validator = tracker.get_validator(4).await.unwrap().unwrap();
        assert_eq!(validator.state_transition_count, 2);
        assert_eq!(validator.total_stake, Amount(2_000));
        assert_eq!(validator.linked_peer_id, None);

        let history = tracker.get_validator_history(4).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].old_value.as_deref(), Some("reporting"));
        assert_eq!(history[1].new_value.as_deref(), Some("2000"));
    }

    #[tokio::test]
    async fn test_last_declaring_node_wins() {
        let (tracker, _clock) = tracker().await;
        let nodes = vec![reporting_node("first", 9), reporting_node("second", 9)];

        tracker.process_validators(&[chain_validator(9, 10, 0.1)], &nodes).await.unwrap();

        let validator = tracker.get_validator(9).await.unwrap().unwrap();
        assert_eq!(validator.linked_peer_id.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_malformed_entries_are_isolated() {
        let (tracker, _clock) = tracker().await;
        let chain = vec![chain_validator(1, 10, 0.5), chain_validator(2, 10, f64::NAN)];

        let result = tracker.process_validators(&chain, &[]).await.unwrap();
        assert_eq!(result.processed, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(tracker.get_validator(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consensus_visibility_and_snapshot() {
        let (tracker, _clock) = tracker().await;
        let chain = vec![
            chain_validator(1, 3_000, 0.6),
            chain_validator(2, 1_000, 0.3),
            chain_validator(3, 1_000, 0.1),
        ];
        tracker
            .process_validators(&chain, &[reporting_node("a", 1), reporting_node("c", 3)])
            .await
            .unwrap();

        let visibility = tracker.calculate_consensus_visibility().await.unwrap();
        assert_eq!(visibility.total_validators, 3);
        assert_eq!(visibility.visible_validators, 2);
        assert!((visibility.validator_coverage_pct - 66.666).abs() < 0.01);
        assert!((visibility.stake_visibility_pct - 70.0).abs() < 1e-9);
        assert_eq!(visibility.total_stake, Amount(5_000));
        assert_eq!(visibility.visible_stake, Amount(4_000));
        assert_eq!(visibility.phantom_stake, Amount(1_000));

        let snapshot = tracker.record_consensus_snapshot().await.unwrap();
        assert_eq!(snapshot.phantom_validators, 1);

        let history = tracker.get_consensus_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], snapshot);
        assert_eq!(
            history[0].quorum_health,
            QuorumHealth::from_stake_visibility(visibility.stake_visibility_pct)
        );
    }

    #[tokio::test]
    async fn test_empty_table_is_critical_without_panicking() {
        let (tracker, _clock) = tracker().await;
        let visibility = tracker.calculate_consensus_visibility().await.unwrap();
        assert_eq!(visibility.total_validators, 0);
        assert_eq!(visibility.stake_visibility_pct, 0.0);
        assert_eq!(visibility.quorum_health, QuorumHealth::Critical);
    }
}
