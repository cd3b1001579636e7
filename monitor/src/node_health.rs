//! Node health history
//!
//! One snapshot per reporting node per cycle. Restarts are detected against
//! the node's previous persisted snapshot, so detection survives daemon
//! restarts.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::database::Database;
use crate::error::Result;
use crate::models::NodeSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NodeHealthRecord {
    pub id: i64,
    pub node_id: String,
    pub timestamp: i64,
    pub peers_count: i64,
    pub finalized_height: Option<i64>,
    pub consensus_running: bool,
    pub uptime_ms: Option<i64>,
    pub restart_detected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NodeRestart {
    pub node_id: String,
    pub restarts: i64,
    pub last_restart: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeHealthResult {
    pub recorded: usize,
    pub restarted: Vec<String>,
}

pub struct NodeHealthTracker {
    pool: sqlx::SqlitePool,
    clock: Arc<dyn Clock>,
}

impl NodeHealthTracker {
    pub fn new(database: &Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool: database.pool().clone(),
            clock,
        }
    }

    pub async fn record_node_health(&self, nodes: &[NodeSummary]) -> Result<NodeHealthResult> {
        let now = self.clock.now_millis();
        let mut result = NodeHealthResult::default();

        for node in nodes {
            let uptime_ms = node.uptime.and_then(|uptime| i64::try_from(uptime).ok());
            let previous_uptime = self.previous_uptime(&node.node_id).await?;

            let restart_detected = matches!(
                (previous_uptime, uptime_ms),
                (Some(previous), Some(current)) if current < previous
            );
            if restart_detected {
                debug!(node_id = %node.node_id, "node restart detected");
                result.restarted.push(node.node_id.clone());
            }

            sqlx::query(
                r#"
                INSERT INTO node_health_history (
                    node_id, timestamp, peers_count, finalized_height,
                    consensus_running, uptime_ms, restart_detected
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&node.node_id)
            .bind(now)
            .bind(node.peers_count as i64)
            .bind(node.finalized_block_height.and_then(|h| i64::try_from(h).ok()))
            .bind(node.consensus_running)
            .bind(uptime_ms)
            .bind(restart_detected)
            .execute(&self.pool)
            .await?;

            result.recorded += 1;
        }

        if !result.restarted.is_empty() {
            info!(count = result.restarted.len(), "nodes restarted since last snapshot");
        }

        Ok(result)
    }

    async fn previous_uptime(&self, node_id: &str) -> Result<Option<i64>> {
        let uptime = sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT uptime_ms FROM node_health_history
            WHERE node_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(uptime.flatten())
    }

    /// Newest first.
    pub async fn get_node_health_history(&self, node_id: &str, limit: i64) -> Result<Vec<NodeHealthRecord>> {
        let records = sqlx::query_as::<_, NodeHealthRecord>(
            r#"
            SELECT id, node_id, timestamp, peers_count, finalized_height,
                   consensus_running, uptime_ms, restart_detected
            FROM node_health_history
            WHERE node_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(node_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn get_restarted_nodes(&self, since: Duration) -> Result<Vec<NodeRestart>> {
        let cutoff = (self.clock.now() - since).timestamp_millis();

        let restarts = sqlx::query_as::<_, NodeRestart>(
            r#"
            SELECT node_id, COUNT(*) AS restarts, MAX(timestamp) AS last_restart
            FROM node_health_history
            WHERE restart_detected = TRUE AND timestamp >= ?
            GROUP BY node_id
            ORDER BY last_restart DESC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(restarts)
    }
}
