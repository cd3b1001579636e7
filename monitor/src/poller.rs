//! Poll orchestrator
//!
//! One cycle pulls every upstream once and feeds the trackers in a fixed
//! order. Upstream failures are written into the [`CycleReport`] and the
//! cycle moves on; only the scheduler decides when the next one runs.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::alerts::AlertRunSummary;
use crate::blocks::{BlockProcessResult, DEFAULT_BLOCK_RETENTION_DAYS};
use crate::clock::Clock;
use crate::error::Result;
use crate::fetch::{with_timeout, BoundedPool, ChainSource, DashboardSource, GeoProvider, ValidatorFetcher};
use crate::inference::InferenceSummary;
use crate::models::{BlockInfo, NodeSummary};
use crate::peers::{PeerSource, PeerUpdate};
use crate::trackers::Trackers;
use crate::validators::ValidatorProcessResult;

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    /// Applied to every upstream call.
    pub fetch_timeout: Duration,
    pub fetch_concurrency: usize,
    pub geo_lookups_per_cycle: usize,
    pub geo_stale_days: i64,
    pub max_blocks_per_cycle: u64,
    pub block_retention: ChronoDuration,
    pub validator_cache_ttl: ChronoDuration,
    pub bootstrapper_min_seen_by: i64,
    pub bootstrapper_min_age_days: i64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(30),
            fetch_concurrency: 8,
            geo_lookups_per_cycle: 40,
            geo_stale_days: 30,
            max_blocks_per_cycle: 500,
            block_retention: ChronoDuration::days(DEFAULT_BLOCK_RETENTION_DAYS),
            validator_cache_ttl: ChronoDuration::minutes(5),
            bootstrapper_min_seen_by: 10,
            bootstrapper_min_age_days: 7,
        }
    }
}

/// Upstreams; a missing one skips its steps.
#[derive(Clone, Default)]
pub struct Sources {
    pub dashboard: Option<Arc<dyn DashboardSource>>,
    pub chain: Option<Arc<dyn ChainSource>>,
    pub geo: Option<Arc<dyn GeoProvider>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepTiming {
    pub step: &'static str,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: i64,
    pub duration_ms: u64,
    pub nodes_reported: usize,
    pub listed_peers: usize,
    pub connections_recorded: usize,
    pub node_restarts: usize,
    pub chain_peers: usize,
    pub bootstrappers: u64,
    pub geo_lookups: usize,
    pub geo_located: usize,
    pub inference: InferenceSummary,
    pub validators_cached: bool,
    pub validators: Option<ValidatorProcessResult>,
    pub blocks: Option<BlockProcessResult>,
    pub blocks_cleaned: u64,
    pub alerts: Option<AlertRunSummary>,
    pub timings: Vec<StepTiming>,
    pub errors: Vec<String>,
}

impl CycleReport {
    fn record_error(&mut self, step: &str, error: impl std::fmt::Display) {
        warn!(step, error = %error, "cycle step failed");
        self.errors.push(format!("{}: {}", step, error));
    }
}

pub struct PollOrchestrator {
    trackers: Trackers,
    sources: Sources,
    validator_fetcher: Option<ValidatorFetcher>,
    pool: BoundedPool,
    clock: Arc<dyn Clock>,
    config: PollConfig,
}

impl PollOrchestrator {
    pub fn new(trackers: Trackers, sources: Sources, clock: Arc<dyn Clock>, config: PollConfig) -> Self {
        let pool = BoundedPool::new(config.fetch_concurrency, config.fetch_timeout);
        // Without a dashboard feed every validator would read as a phantom.
        let validator_fetcher = match (&sources.chain, &sources.dashboard) {
            (Some(chain), Some(_)) => Some(ValidatorFetcher::new(
                chain.clone(),
                pool.clone(),
                config.validator_cache_ttl,
                clock.clone(),
            )),
            (Some(_), None) => {
                warn!("no dashboard feed configured; validator tracking disabled");
                None
            }
            (None, _) => None,
        };

        Self {
            trackers,
            sources,
            validator_fetcher,
            pool,
            clock,
            config,
        }
    }

    pub fn trackers(&self) -> &Trackers {
        &self.trackers
    }

    /// Runs one full cycle. Only storage failures inside the trackers abort
    /// a step; nothing aborts the cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("poll_cycle", cycle_id = %cycle_id);
        self.run_cycle_inner(cycle_id).instrument(span).await
    }

    async fn run_cycle_inner(&self, cycle_id: Uuid) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport {
            cycle_id,
            started_at: self.clock.now_millis(),
            ..Default::default()
        };
        info!("poll cycle started");

        let step = Instant::now();
        let nodes = match self.poll_dashboard(&mut report).await {
            Ok(nodes) => nodes,
            Err(e) => {
                report.record_error("dashboard", e);
                None
            }
        };
        push_timing(&mut report, "dashboard", step);

        let step = Instant::now();
        if let Err(e) = self.poll_chain_peers(&mut report).await {
            report.record_error("chain_peers", e);
        }
        push_timing(&mut report, "chain_peers", step);

        let step = Instant::now();
        match self
            .trackers
            .registry
            .detect_bootstrappers(self.config.bootstrapper_min_seen_by, self.config.bootstrapper_min_age_days)
            .await
        {
            Ok(flagged) => report.bootstrappers = flagged,
            Err(e) => report.record_error("bootstrappers", e),
        }
        push_timing(&mut report, "bootstrappers", step);

        let step = Instant::now();
        if let Err(e) = self.geolocate(&mut report).await {
            report.record_error("geolocation", e);
        }
        push_timing(&mut report, "geolocation", step);

        let step = Instant::now();
        match self.trackers.inference.infer_all_locations().await {
            Ok(summary) => report.inference = summary,
            Err(e) => report.record_error("inference", e),
        }
        push_timing(&mut report, "inference", step);

        let step = Instant::now();
        if let Err(e) = self.poll_validators(nodes.as_deref(), &mut report).await {
            report.record_error("validators", e);
        }
        push_timing(&mut report, "validators", step);

        let step = Instant::now();
        if let Err(e) = self.poll_blocks(&mut report).await {
            report.record_error("blocks", e);
        }
        push_timing(&mut report, "blocks", step);

        let step = Instant::now();
        match self.trackers.alerting.run_all_checks().await {
            Ok(summary) => report.alerts = Some(summary),
            Err(e) => report.record_error("alerts", e),
        }
        push_timing(&mut report, "alerts", step);

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            duration_ms = report.duration_ms,
            errors = report.errors.len(),
            "poll cycle complete"
        );
        report
    }

    /// Returns the node list when the dashboard answered, so validator
    /// matching never runs against a missing feed.
    async fn poll_dashboard(&self, report: &mut CycleReport) -> Result<Option<Vec<NodeSummary>>> {
        let Some(dashboard) = &self.sources.dashboard else {
            return Ok(None);
        };

        let nodes = with_timeout("fetch_nodes", self.config.fetch_timeout, dashboard.fetch_nodes()).await?;
        let registry = &self.trackers.registry;

        for node in &nodes {
            registry
                .upsert_peer(
                    &node.node_id,
                    PeerSource::Reporting,
                    PeerUpdate {
                        node_name: node.node_name.clone(),
                        client_version: node.client.clone(),
                        ..Default::default()
                    },
                )
                .await?;

            for peer_id in &node.peers_list {
                registry
                    .upsert_peer(peer_id, PeerSource::Inferred, PeerUpdate::default())
                    .await?;
                report.listed_peers += 1;
                if registry.record_connection(&node.node_id, peer_id).await? {
                    report.connections_recorded += 1;
                }
            }
        }

        let health = self.trackers.node_health.record_node_health(&nodes).await?;
        report.node_restarts = health.restarted.len();
        report.nodes_reported = nodes.len();
        debug!(nodes = nodes.len(), "dashboard nodes processed");

        Ok(Some(nodes))
    }

    async fn poll_chain_peers(&self, report: &mut CycleReport) -> Result<()> {
        let Some(chain) = &self.sources.chain else {
            return Ok(());
        };

        let timeout = self.config.fetch_timeout;
        let local_id = with_timeout("get_node_id", timeout, chain.get_node_id()).await?;
        let peers = with_timeout("get_peers", timeout, chain.get_peers()).await?;
        let registry = &self.trackers.registry;

        registry
            .upsert_peer(&local_id, PeerSource::Grpc, PeerUpdate::default())
            .await?;

        for peer in &peers {
            registry
                .upsert_peer(
                    &peer.peer_id,
                    PeerSource::Grpc,
                    PeerUpdate {
                        ip_address: peer.ip_address.clone(),
                        port: peer.port,
                        catchup_status: peer.catchup_status.clone(),
                        latency_ms: peer.latency_ms,
                        packets_sent: peer.packets_sent,
                        packets_received: peer.packets_received,
                        grpc_bootstrapper: Some(peer.is_bootstrapper),
                        ..Default::default()
                    },
                )
                .await?;
            if registry.record_connection(&local_id, &peer.peer_id).await? {
                report.connections_recorded += 1;
            }
        }

        report.chain_peers = peers.len();
        Ok(())
    }

    async fn geolocate(&self, report: &mut CycleReport) -> Result<()> {
        let Some(geo) = self.sources.geo.clone() else {
            return Ok(());
        };

        let queue: Vec<(String, String)> = self
            .trackers
            .registry
            .get_peers_needing_geo_lookup(self.config.geo_stale_days)
            .await?
            .into_iter()
            .filter_map(|peer| peer.ip_address.map(|ip| (peer.id, ip)))
            .take(self.config.geo_lookups_per_cycle)
            .collect();

        report.geo_lookups = queue.len();
        if queue.is_empty() {
            return Ok(());
        }

        let outcomes = self
            .pool
            .run("geo_lookup", queue, move |(_, ip)| {
                let geo = geo.clone();
                async move { geo.lookup(&ip).await }
            })
            .await;

        for outcome in outcomes {
            let (peer_id, ip) = outcome.item;
            match outcome.result {
                Ok(Some(result)) => {
                    if self.trackers.registry.update_geolocation(&peer_id, &result).await? {
                        report.geo_located += 1;
                    }
                }
                Ok(None) => debug!(peer_id = %peer_id, ip = %ip, "no location for address"),
                Err(e) => report.record_error("geolocation", format!("{}: {}", peer_id, e)),
            }
        }

        Ok(())
    }

    async fn poll_validators(&self, nodes: Option<&[NodeSummary]>, report: &mut CycleReport) -> Result<()> {
        let Some(fetcher) = &self.validator_fetcher else {
            return Ok(());
        };
        let Some(nodes) = nodes else {
            report.record_error("validators", "skipped, no dashboard snapshot to match against");
            return Ok(());
        };

        let fetch = fetcher.fetch_validators().await?;
        report.validators_cached = fetch.cached;
        for error in fetch.errors {
            report.record_error("validators", error);
        }

        let validators = &self.trackers.validators;
        let result = validators.process_validators(&fetch.validators, nodes).await?;
        validators.record_consensus_snapshot().await?;
        report.validators = Some(result);
        Ok(())
    }

    /// Fetches from the next unseen height up to the finalized one. Only
    /// the contiguous prefix of successful fetches is stored so a failed
    /// height is retried next cycle.
    async fn poll_blocks(&self, report: &mut CycleReport) -> Result<()> {
        let blocks = &self.trackers.blocks;

        if let Some(chain) = self.sources.chain.clone() {
            let finalized = with_timeout(
                "get_finalized_height",
                self.config.fetch_timeout,
                chain.get_finalized_height(),
            )
            .await?;

            let limit = self.config.max_blocks_per_cycle.max(1);
            let start = match blocks.latest_height().await? {
                Some(latest) => latest as u64 + 1,
                None => finalized.saturating_sub(limit - 1),
            };
            let end = finalized.min(start.saturating_add(limit - 1));

            if start <= end {
                let outcomes = self
                    .pool
                    .run("get_block_at_height", (start..=end).collect::<Vec<u64>>(), move |height| {
                        let chain = chain.clone();
                        async move { chain.get_block_at_height(height).await }
                    })
                    .await;

                let mut fetched: Vec<BlockInfo> = Vec::with_capacity(outcomes.len());
                let mut gap = false;
                for outcome in outcomes {
                    match outcome.result {
                        Ok(block) if !gap => fetched.push(block),
                        Ok(_) => {}
                        Err(e) => {
                            gap = true;
                            report.record_error("blocks", format!("height {}: {}", outcome.item, e));
                        }
                    }
                }

                let result = blocks.process_blocks(&fetched).await?;
                for error in &result.errors {
                    report.record_error("blocks", error);
                }
                report.blocks = Some(result);
            }
        }

        blocks.recalculate_block_counts().await?;
        report.blocks_cleaned = blocks.cleanup_old_blocks(self.config.block_retention).await?;
        if report.blocks_cleaned > 0 {
            blocks.recalculate_block_counts().await?;
        }
        Ok(())
    }

    /// Runs cycles at the configured interval until `shutdown` resolves.
    /// A cycle in progress always completes.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(interval_secs = self.config.interval.as_secs(), "starting poll scheduler");

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("poll scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    if !report.errors.is_empty() {
                        warn!(cycle_id = %report.cycle_id, errors = ?report.errors, "cycle finished with errors");
                    }
                }
            }
        }
    }
}

fn push_timing(report: &mut CycleReport, step: &'static str, started: Instant) {
    report.timings.push(StepTiming {
        step,
        duration_ms: started.elapsed().as_millis() as u64,
    });
}
