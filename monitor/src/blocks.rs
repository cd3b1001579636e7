//! Block production tracking
//!
//! Blocks are immutable once stored and keyed by height, so replaying a
//! range is harmless. The per-validator counters kept here are a cache;
//! [`BlockTracker::recalculate_block_counts`] rebuilds them from the blocks
//! table, which is the source of truth.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::database::Database;
use crate::error::{MonitorError, Result};
use crate::models::BlockInfo;
use crate::validators::visibility::percentage;
use crate::validators::ValidatorSource;

pub const DEFAULT_BLOCK_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Block {
    pub height: i64,
    pub hash: String,
    pub baker_id: Option<i64>,
    pub timestamp: i64,
    pub recorded_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProcessResult {
    pub blocks_processed: usize,
    pub skipped_duplicates: usize,
    /// Bakers that produced a stored block but have no validator row.
    pub unknown_bakers: Vec<i64>,
    /// Blocks rejected before storage.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockProductionStats {
    pub window_ms: i64,
    pub total_blocks: i64,
    pub visible_blocks: i64,
    pub phantom_blocks: i64,
    /// Blocks whose baker has no validator row; included in `phantom_blocks`.
    pub unknown_baker_blocks: i64,
    pub phantom_block_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlockProducer {
    pub baker_id: i64,
    pub block_count: i64,
    pub source: Option<ValidatorSource>,
    pub last_block_height: i64,
}

pub struct BlockTracker {
    pool: sqlx::SqlitePool,
    clock: Arc<dyn Clock>,
}

impl BlockTracker {
    pub fn new(database: &Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool: database.pool().clone(),
            clock,
        }
    }

    /// Stores new blocks and credits their bakers. Heights already present
    /// are skipped, never overwritten. Blocks may arrive in any order.
    pub async fn process_blocks(&self, blocks: &[BlockInfo]) -> Result<BlockProcessResult> {
        let mut result = BlockProcessResult::default();
        let mut unknown = BTreeSet::new();
        let recorded_at = self.clock.now_millis();

        for block in blocks {
            let (height, baker_id) = match block_keys(block) {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(height = block.height, "skipping block: {}", e);
                    result.errors.push(e.to_string());
                    continue;
                }
            };
            let timestamp = block.timestamp.timestamp_millis();

            let inserted = sqlx::query(
                r#"
                INSERT INTO blocks (height, hash, baker_id, timestamp, recorded_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (height) DO NOTHING
                "#,
            )
            .bind(height)
            .bind(&block.hash)
            .bind(baker_id)
            .bind(timestamp)
            .bind(recorded_at)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if inserted == 0 {
                debug!(height, "block already recorded");
                result.skipped_duplicates += 1;
                continue;
            }
            result.blocks_processed += 1;

            let Some(baker_id) = baker_id else {
                continue;
            };

            let credited = sqlx::query(
                r#"
                UPDATE validators SET
                    last_block_time = CASE
                        WHEN last_block_height IS NULL OR ?1 > last_block_height THEN ?2
                        ELSE last_block_time
                    END,
                    last_block_height = CASE
                        WHEN last_block_height IS NULL OR ?1 > last_block_height THEN ?1
                        ELSE last_block_height
                    END,
                    blocks_24h = blocks_24h + 1
                WHERE baker_id = ?3
                "#,
            )
            .bind(height)
            .bind(timestamp)
            .bind(baker_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if credited == 0 {
                unknown.insert(baker_id);
            }
        }

        result.unknown_bakers = unknown.into_iter().collect();

        info!(
            processed = result.blocks_processed,
            duplicates = result.skipped_duplicates,
            unknown_bakers = result.unknown_bakers.len(),
            "blocks processed"
        );

        Ok(result)
    }

    /// Rebuilds `blocks_24h` and `blocks_7d` for every validator from the
    /// stored blocks.
    pub async fn recalculate_block_counts(&self) -> Result<u64> {
        let now = self.clock.now();
        let day_ago = (now - Duration::hours(24)).timestamp_millis();
        let week_ago = (now - Duration::days(7)).timestamp_millis();

        let result = sqlx::query(
            r#"
            UPDATE validators SET
                blocks_24h = (
                    SELECT COUNT(*) FROM blocks b
                    WHERE b.baker_id = validators.baker_id AND b.timestamp >= ?1
                ),
                blocks_7d = (
                    SELECT COUNT(*) FROM blocks b
                    WHERE b.baker_id = validators.baker_id AND b.timestamp >= ?2
                )
            "#,
        )
        .bind(day_ago)
        .bind(week_ago)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Visible versus phantom production over the trailing `window`. A
    /// block counts as phantom when its baker is chain-only or unknown.
    pub async fn calculate_block_production_stats(&self, window: Duration) -> Result<BlockProductionStats> {
        let since = (self.clock.now() - window).timestamp_millis();

        let (total_blocks, visible_blocks, unknown_baker_blocks) = sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN v.source = 'reporting' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN v.baker_id IS NULL THEN 1 ELSE 0 END), 0)
            FROM blocks b
            LEFT JOIN validators v ON v.baker_id = b.baker_id
            WHERE b.timestamp >= ?
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let phantom_blocks = total_blocks - visible_blocks;

        Ok(BlockProductionStats {
            window_ms: window.num_milliseconds(),
            total_blocks,
            visible_blocks,
            phantom_blocks,
            unknown_baker_blocks,
            phantom_block_pct: percentage(phantom_blocks as f64, total_blocks as f64),
        })
    }

    pub async fn get_top_block_producers(&self, limit: i64) -> Result<Vec<BlockProducer>> {
        let producers = sqlx::query_as::<_, BlockProducer>(
            r#"
            SELECT
                b.baker_id AS baker_id,
                COUNT(*) AS block_count,
                v.source AS source,
                MAX(b.height) AS last_block_height
            FROM blocks b
            LEFT JOIN validators v ON v.baker_id = b.baker_id
            WHERE b.baker_id IS NOT NULL
            GROUP BY b.baker_id
            ORDER BY block_count DESC, b.baker_id
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(producers)
    }

    pub async fn get_blocks_by_baker(&self, baker_id: i64, limit: i64) -> Result<Vec<Block>> {
        let blocks = sqlx::query_as::<_, Block>(
            r#"
            SELECT height, hash, baker_id, timestamp, recorded_at
            FROM blocks
            WHERE baker_id = ?
            ORDER BY height DESC
            LIMIT ?
            "#,
        )
        .bind(baker_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(blocks)
    }

    pub async fn get_recent_blocks(&self, limit: i64) -> Result<Vec<Block>> {
        let blocks = sqlx::query_as::<_, Block>(
            r#"
            SELECT height, hash, baker_id, timestamp, recorded_at
            FROM blocks
            ORDER BY height DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(blocks)
    }

    /// Highest stored height, if any.
    pub async fn latest_height(&self) -> Result<Option<i64>> {
        let height = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(height) FROM blocks")
            .fetch_one(&self.pool)
            .await?;

        Ok(height)
    }

    /// Deletes blocks older than `retention`. The only destructive
    /// operation on block data.
    pub async fn cleanup_old_blocks(&self, retention: Duration) -> Result<u64> {
        let cutoff = (self.clock.now() - retention).timestamp_millis();

        let deleted = sqlx::query("DELETE FROM blocks WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted > 0 {
            info!(deleted, "old blocks removed");
        }

        Ok(deleted)
    }
}

fn block_keys(block: &BlockInfo) -> Result<(i64, Option<i64>)> {
    let height = to_i64(block.height, "block height")?;
    let baker_id = block.baker_id.map(|id| to_i64(id, "baker id")).transpose()?;
    Ok((height, baker_id))
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| MonitorError::InvalidInput(format!("{what} {value} out of range")))
}
