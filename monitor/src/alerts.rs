//! Consensus alerting
//!
//! Three independent checks over the validator and block trackers. Alerts
//! are append-only and deduplicated by type within a cooldown window; a
//! warning followed by a critical of the same type inside the window is
//! still one alert.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::blocks::BlockTracker;
use crate::clock::Clock;
use crate::database::Database;
use crate::error::{MonitorError, Result};
use crate::validators::{QuorumHealth, ValidatorTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AlertType {
    PhantomBlockRatio,
    StakeVisibility,
    QuorumHealthChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn for_health(health: QuorumHealth) -> Severity {
        match health {
            QuorumHealth::Healthy => Severity::Info,
            QuorumHealth::Degraded => Severity::Warning,
            QuorumHealth::Critical => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub timestamp: i64,
    pub metadata: serde_json::Value,
    pub acknowledged: bool,
    pub acknowledged_at: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: i64,
    alert_type: AlertType,
    severity: Severity,
    message: String,
    timestamp: i64,
    metadata: String,
    acknowledged: bool,
    acknowledged_at: Option<i64>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = MonitorError;

    fn try_from(row: AlertRow) -> Result<Self> {
        Ok(Alert {
            id: row.id,
            alert_type: row.alert_type,
            severity: row.severity,
            message: row.message,
            timestamp: row.timestamp,
            metadata: serde_json::from_str(&row.metadata)?,
            acknowledged: row.acknowledged,
            acknowledged_at: row.acknowledged_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecordOutcome {
    pub recorded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SuppressionReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<i64>,
}

impl AlertRecordOutcome {
    fn recorded(alert_id: i64) -> Self {
        Self { recorded: true, reason: None, alert_id: Some(alert_id) }
    }

    fn suppressed(reason: SuppressionReason) -> Self {
        Self { recorded: false, reason: Some(reason), alert_id: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QuorumHealthRecord {
    pub id: i64,
    pub timestamp: i64,
    pub health: QuorumHealth,
    pub stake_visibility_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhantomBlockCheck {
    pub triggered: bool,
    pub phantom_block_pct: f64,
    pub total_blocks: i64,
    pub phantom_blocks: i64,
    pub alert: Option<NewAlert>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakeVisibilityCheck {
    pub triggered: bool,
    pub stake_visibility_pct: f64,
    pub alert: Option<NewAlert>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuorumHealthCheck {
    pub triggered: bool,
    pub previous: Option<QuorumHealth>,
    pub current: QuorumHealth,
    pub stake_visibility_pct: f64,
    pub alert: Option<NewAlert>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRunSummary {
    pub alerts_triggered: usize,
    pub alerts_recorded: usize,
    pub alerts_suppressed: usize,
    pub phantom_blocks: PhantomBlockCheck,
    pub stake_visibility: StakeVisibilityCheck,
    pub quorum_health: QuorumHealthCheck,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertConfig {
    /// Percent of blocks produced by phantoms above which to warn.
    pub phantom_block_threshold_pct: f64,
    pub phantom_block_window: Duration,
    pub stake_visibility_warning_pct: f64,
    pub stake_visibility_critical_pct: f64,
    pub cooldown: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            phantom_block_threshold_pct: 20.0,
            phantom_block_window: Duration::hours(24),
            stake_visibility_warning_pct: 70.0,
            stake_visibility_critical_pct: 50.0,
            cooldown: Duration::hours(1),
        }
    }
}

const ALERT_COLUMNS: &str =
    "id, alert_type, severity, message, timestamp, metadata, acknowledged, acknowledged_at";

pub struct ConsensusAlerting {
    pool: sqlx::SqlitePool,
    clock: Arc<dyn Clock>,
    validators: Arc<ValidatorTracker>,
    blocks: Arc<BlockTracker>,
    config: AlertConfig,
}

impl ConsensusAlerting {
    pub fn new(
        database: &Database,
        clock: Arc<dyn Clock>,
        validators: Arc<ValidatorTracker>,
        blocks: Arc<BlockTracker>,
        config: AlertConfig,
    ) -> Self {
        Self {
            pool: database.pool().clone(),
            clock,
            validators,
            blocks,
            config,
        }
    }

    pub async fn check_phantom_blocks(&self) -> Result<PhantomBlockCheck> {
        let stats = self
            .blocks
            .calculate_block_production_stats(self.config.phantom_block_window)
            .await?;
        let threshold = self.config.phantom_block_threshold_pct;
        let triggered = stats.phantom_block_pct > threshold;

        let alert = triggered.then(|| NewAlert {
            alert_type: AlertType::PhantomBlockRatio,
            severity: Severity::Warning,
            message: format!(
                "Phantom validators produced {:.1}% of blocks in the last {}h (threshold {:.1}%)",
                stats.phantom_block_pct,
                self.config.phantom_block_window.num_hours(),
                threshold
            ),
            metadata: json!({
                "phantom_block_pct": stats.phantom_block_pct,
                "phantom_blocks": stats.phantom_blocks,
                "total_blocks": stats.total_blocks,
                "unknown_baker_blocks": stats.unknown_baker_blocks,
                "threshold_pct": threshold,
                "window_ms": stats.window_ms,
            }),
        });

        Ok(PhantomBlockCheck {
            triggered,
            phantom_block_pct: stats.phantom_block_pct,
            total_blocks: stats.total_blocks,
            phantom_blocks: stats.phantom_blocks,
            alert,
        })
    }

    /// Critical is checked before warning. No validators means no data,
    /// which is not an alert.
    pub async fn check_stake_visibility(&self) -> Result<StakeVisibilityCheck> {
        let visibility = self.validators.calculate_consensus_visibility().await?;
        let pct = visibility.stake_visibility_pct;

        let severity = if visibility.total_validators == 0 {
            None
        } else if pct < self.config.stake_visibility_critical_pct {
            Some((Severity::Critical, self.config.stake_visibility_critical_pct))
        } else if pct < self.config.stake_visibility_warning_pct {
            Some((Severity::Warning, self.config.stake_visibility_warning_pct))
        } else {
            None
        };

        let alert = severity.map(|(severity, threshold)| NewAlert {
            alert_type: AlertType::StakeVisibility,
            severity,
            message: format!(
                "Only {:.1}% of lottery power is visible (threshold {:.1}%)",
                pct, threshold
            ),
            metadata: json!({
                "stake_visibility_pct": pct,
                "threshold_pct": threshold,
                "visible_validators": visibility.visible_validators,
                "phantom_validators": visibility.phantom_validators,
                "phantom_stake": visibility.phantom_stake,
            }),
        });

        Ok(StakeVisibilityCheck {
            triggered: alert.is_some(),
            stake_visibility_pct: pct,
            alert,
        })
    }

    /// Compares current health with the last persisted reading. Without a
    /// previous reading there is nothing to compare and nothing fires.
    pub async fn check_quorum_health_change(&self) -> Result<QuorumHealthCheck> {
        let visibility = self.validators.calculate_consensus_visibility().await?;
        let current = QuorumHealth::from_stake_visibility(visibility.stake_visibility_pct);
        let previous = self.get_latest_quorum_health().await?.map(|record| record.health);

        let alert = match previous {
            Some(previous) if previous != current => Some(NewAlert {
                alert_type: AlertType::QuorumHealthChange,
                severity: Severity::for_health(current),
                message: format!(
                    "Quorum health changed from {} to {} ({:.1}% stake visible)",
                    previous.as_str(),
                    current.as_str(),
                    visibility.stake_visibility_pct
                ),
                metadata: json!({
                    "previous": previous,
                    "current": current,
                    "stake_visibility_pct": visibility.stake_visibility_pct,
                }),
            }),
            _ => None,
        };

        Ok(QuorumHealthCheck {
            triggered: alert.is_some(),
            previous,
            current,
            stake_visibility_pct: visibility.stake_visibility_pct,
            alert,
        })
    }

    /// Persists `alert` unless one of the same type was recorded within the
    /// cooldown.
    pub async fn record_alert(&self, alert: &NewAlert) -> Result<AlertRecordOutcome> {
        let now = self.clock.now();
        let since = (now - self.config.cooldown).timestamp_millis();

        let recent = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM consensus_alerts WHERE alert_type = ? AND timestamp > ?",
        )
        .bind(alert.alert_type)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        if recent > 0 {
            info!(alert_type = ?alert.alert_type, "alert suppressed by cooldown");
            return Ok(AlertRecordOutcome::suppressed(SuppressionReason::Cooldown));
        }

        let id = sqlx::query(
            r#"
            INSERT INTO consensus_alerts (alert_type, severity, message, timestamp, metadata)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.alert_type)
        .bind(alert.severity)
        .bind(&alert.message)
        .bind(now.timestamp_millis())
        .bind(serde_json::to_string(&alert.metadata)?)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        warn!(alert_type = ?alert.alert_type, severity = ?alert.severity, "{}", alert.message);
        Ok(AlertRecordOutcome::recorded(id))
    }

    /// Runs every check, records what fired and appends the current quorum
    /// health so the next run has a baseline.
    pub async fn run_all_checks(&self) -> Result<AlertRunSummary> {
        let phantom_blocks = self.check_phantom_blocks().await?;
        let stake_visibility = self.check_stake_visibility().await?;
        let quorum_health = self.check_quorum_health_change().await?;

        let mut alerts_triggered = 0;
        let mut alerts_recorded = 0;
        let mut alerts_suppressed = 0;

        let fired = [&phantom_blocks.alert, &stake_visibility.alert, &quorum_health.alert];
        for alert in fired.into_iter().flatten() {
            alerts_triggered += 1;
            if self.record_alert(alert).await?.recorded {
                alerts_recorded += 1;
            } else {
                alerts_suppressed += 1;
            }
        }

        self.record_quorum_health(quorum_health.current, quorum_health.stake_visibility_pct)
            .await?;

        info!(
            triggered = alerts_triggered,
            recorded = alerts_recorded,
            suppressed = alerts_suppressed,
            "alert checks complete"
        );

        Ok(AlertRunSummary {
            alerts_triggered,
            alerts_recorded,
            alerts_suppressed,
            phantom_blocks,
            stake_visibility,
            quorum_health,
        })
    }

    pub async fn record_quorum_health(&self, health: QuorumHealth, stake_visibility_pct: f64) -> Result<QuorumHealthRecord> {
        let timestamp = self.clock.now_millis();

        let id = sqlx::query(
            "INSERT INTO quorum_health_history (timestamp, health, stake_visibility_pct) VALUES (?, ?, ?)",
        )
        .bind(timestamp)
        .bind(health)
        .bind(stake_visibility_pct)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(QuorumHealthRecord { id, timestamp, health, stake_visibility_pct })
    }

    pub async fn get_latest_quorum_health(&self) -> Result<Option<QuorumHealthRecord>> {
        let record = sqlx::query_as::<_, QuorumHealthRecord>(
            r#"
            SELECT id, timestamp, health, stake_visibility_pct
            FROM quorum_health_history
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_quorum_health_history(&self, limit: i64) -> Result<Vec<QuorumHealthRecord>> {
        let records = sqlx::query_as::<_, QuorumHealthRecord>(
            r#"
            SELECT id, timestamp, health, stake_visibility_pct
            FROM quorum_health_history
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn get_recent_alerts(&self, limit: i64) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM consensus_alerts ORDER BY timestamp DESC, id DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Alert::try_from).collect()
    }

    pub async fn get_unacknowledged_alerts(&self) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM consensus_alerts WHERE acknowledged = FALSE ORDER BY timestamp DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Alert::try_from).collect()
    }

    /// Returns `false` for an unknown id. Acknowledging twice keeps the
    /// first acknowledgement time.
    pub async fn acknowledge_alert(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE consensus_alerts SET
                acknowledged = TRUE,
                acknowledged_at = COALESCE(acknowledged_at, ?)
            WHERE id = ?
            "#,
        )
        .bind(self.clock.now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{from_millis, ManualClock};
    use crate::database::test_database;
    use crate::models::{Amount, BlockInfo, ChainValidator, NodeSummary};

    const NOW: i64 = 1_700_000_000_000;

    struct Fixture {
        alerting: ConsensusAlerting,
        validators: Arc<ValidatorTracker>,
        blocks: Arc<BlockTracker>,
        clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let db = test_database().await;
        let clock = Arc::new(ManualClock::at_millis(NOW));
        let validators = Arc::new(ValidatorTracker::new(&db, clock.clone()));
        let blocks = Arc::new(BlockTracker::new(&db, clock.clone()));
        let alerting = ConsensusAlerting::new(
            &db,
            clock.clone(),
            validators.clone(),
            blocks.clone(),
            AlertConfig::default(),
        );
        Fixture { alerting, validators, blocks, clock }
    }

    /// Validators with the given lottery powers; the first `visible` report.
    async fn seed(validators: &ValidatorTracker, powers: &[f64], visible: usize) {
        let chain: Vec<ChainValidator> = powers
            .iter()
            .enumerate()
            .map(|(i, &lottery_power)| ChainValidator {
                baker_id: i as u64 + 1,
                account_address: format!("addr-{i}"),
                total_stake: Amount(1_000),
                lottery_power,
                ..Default::default()
            })
            .collect();
        let nodes: Vec<NodeSummary> = (0..visible)
            .map(|i| NodeSummary {
                node_id: format!("node-{i}"),
                consensus_baker_id: Some(i as u64 + 1),
                ..Default::default()
            })
            .collect();
        validators.process_validators(&chain, &nodes).await.unwrap();
    }

    fn stake_alert(severity: Severity) -> NewAlert {
        NewAlert {
            alert_type: AlertType::StakeVisibility,
            severity,
            message: "test".to_string(),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn test_cooldown_deduplicates_by_type() {
        let f = fixture().await;

        let first = f.alerting.record_alert(&stake_alert(Severity::Warning)).await.unwrap();
        assert!(first.recorded);

        f.advance_minutes(30);
        let second = f.alerting.record_alert(&stake_alert(Severity::Critical)).await.unwrap();
        assert_eq!(second, AlertRecordOutcome::suppressed(SuppressionReason::Cooldown));
        assert_eq!(
            serde_json::to_value(second).unwrap(),
            json!({"recorded": false, "reason": "cooldown"})
        );
        assert_eq!(f.alerting.get_recent_alerts(10).await.unwrap().len(), 1);

        // Different type is independent.
        let other = NewAlert { alert_type: AlertType::PhantomBlockRatio, ..stake_alert(Severity::Warning) };
        assert!(f.alerting.record_alert(&other).await.unwrap().recorded);

        f.advance_minutes(30);
        let third = f.alerting.record_alert(&stake_alert(Severity::Critical)).await.unwrap();
        assert!(third.recorded);
        assert_eq!(f.alerting.get_recent_alerts(10).await.unwrap().len(), 3);
    }

    impl Fixture {
        fn advance_minutes(&self, minutes: i64) {
            self.clock.advance(Duration::minutes(minutes));
        }
    }

    #[tokio::test]
    async fn test_stake_visibility_severity() {
        let f = fixture().await;

        let empty = f.alerting.check_stake_visibility().await.unwrap();
        assert!(!empty.triggered);

        // 60% visible: warning.
        seed(&f.validators, &[0.6, 0.4], 1).await;
        let warning = f.alerting.check_stake_visibility().await.unwrap();
        assert!(warning.triggered);
        assert_eq!(warning.alert.unwrap().severity, Severity::Warning);

        // 40% visible: critical wins.
        seed(&f.validators, &[0.4, 0.6], 1).await;
        let critical = f.alerting.check_stake_visibility().await.unwrap();
        assert_eq!(critical.alert.unwrap().severity, Severity::Critical);

        // Fully visible: nothing.
        seed(&f.validators, &[0.4, 0.6], 2).await;
        assert!(!f.alerting.check_stake_visibility().await.unwrap().triggered);
    }

    #[tokio::test]
    async fn test_quorum_change_is_silent_on_cold_start() {
        let f = fixture().await;
        seed(&f.validators, &[0.5, 0.5], 2).await;

        let cold = f.alerting.check_quorum_health_change().await.unwrap();
        assert!(!cold.triggered);
        assert_eq!(cold.previous, None);
        assert_eq!(cold.current, QuorumHealth::Healthy);

        f.alerting.record_quorum_health(QuorumHealth::Healthy, 100.0).await.unwrap();
        assert!(!f.alerting.check_quorum_health_change().await.unwrap().triggered);

        seed(&f.validators, &[0.5, 0.5], 0).await;
        let changed = f.alerting.check_quorum_health_change().await.unwrap();
        assert!(changed.triggered);
        assert_eq!(changed.previous, Some(QuorumHealth::Healthy));
        assert_eq!(changed.current, QuorumHealth::Critical);
        assert_eq!(changed.alert.unwrap().severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_phantom_block_check() {
        let f = fixture().await;
        seed(&f.validators, &[0.5, 0.5], 1).await;

        assert!(!f.alerting.check_phantom_blocks().await.unwrap().triggered);

        let blocks: Vec<BlockInfo> = (1..=4u64)
            .map(|height| BlockInfo {
                height,
                // Baker 2 is the phantom.
                baker_id: Some(if height == 1 { 1 } else { 2 }),
                timestamp: from_millis(NOW - 60_000),
                hash: format!("h{height}"),
            })
            .collect();
        f.blocks.process_blocks(&blocks).await.unwrap();

        let check = f.alerting.check_phantom_blocks().await.unwrap();
        assert!(check.triggered);
        assert_eq!(check.phantom_block_pct, 75.0);
        assert_eq!(check.alert.unwrap().severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_run_all_checks_always_appends_history() {
        let f = fixture().await;
        seed(&f.validators, &[0.5, 0.5], 2).await;

        let quiet = f.alerting.run_all_checks().await.unwrap();
        assert_eq!(quiet.alerts_triggered, 0);
        assert_eq!(f.alerting.get_quorum_health_history(10).await.unwrap().len(), 1);

        seed(&f.validators, &[0.5, 0.5], 0).await;
        f.advance_minutes(5);
        let loud = f.alerting.run_all_checks().await.unwrap();
        // Stake visibility and quorum change.
        assert_eq!(loud.alerts_triggered, 2);
        assert_eq!(loud.alerts_recorded, 2);

        f.advance_minutes(5);
        let repeat = f.alerting.run_all_checks().await.unwrap();
        // Still critical, health unchanged, stake alert in cooldown.
        assert_eq!(repeat.alerts_triggered, 1);
        assert_eq!(repeat.alerts_suppressed, 1);

        let history = f.alerting.get_quorum_health_history(10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].health, QuorumHealth::Critical);
    }

    #[tokio::test]
    async fn test_acknowledge() {
        let f = fixture().await;
        let outcome = f.alerting.record_alert(&stake_alert(Severity::Warning)).await.unwrap();
        let id = outcome.alert_id.unwrap();

        assert_eq!(f.alerting.get_unacknowledged_alerts().await.unwrap().len(), 1);
        assert!(f.alerting.acknowledge_alert(id).await.unwrap());
        f.advance_minutes(1);
        assert!(f.alerting.acknowledge_alert(id).await.unwrap());
        assert!(!f.alerting.acknowledge_alert(id + 100).await.unwrap());

        let alerts = f.alerting.get_recent_alerts(1).await.unwrap();
        assert!(alerts[0].acknowledged);
        assert_eq!(alerts[0].acknowledged_at, Some(NOW));
        assert!(f.alerting.get_unacknowledged_alerts().await.unwrap().is_empty());
    }
}
