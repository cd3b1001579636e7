//! Shared handles to every tracker over one database

use std::sync::Arc;

use crate::alerts::{AlertConfig, ConsensusAlerting};
use crate::blocks::BlockTracker;
use crate::clock::Clock;
use crate::database::Database;
use crate::inference::LocationInference;
use crate::node_health::NodeHealthTracker;
use crate::peers::PeerRegistry;
use crate::validators::ValidatorTracker;

/// The poller writes through these and the query API reads through them.
#[derive(Clone)]
pub struct Trackers {
    pub registry: Arc<PeerRegistry>,
    pub inference: Arc<LocationInference>,
    pub validators: Arc<ValidatorTracker>,
    pub blocks: Arc<BlockTracker>,
    pub alerting: Arc<ConsensusAlerting>,
    pub node_health: Arc<NodeHealthTracker>,
}

impl Trackers {
    pub fn new(database: &Database, clock: Arc<dyn Clock>, alert_config: AlertConfig) -> Self {
        let registry = Arc::new(PeerRegistry::new(database, clock.clone()));
        let inference = Arc::new(LocationInference::new(database, registry.clone()));
        let validators = Arc::new(ValidatorTracker::new(database, clock.clone()));
        let blocks = Arc::new(BlockTracker::new(database, clock.clone()));
        let alerting = Arc::new(ConsensusAlerting::new(
            database,
            clock.clone(),
            validators.clone(),
            blocks.clone(),
            alert_config,
        ));
        let node_health = Arc::new(NodeHealthTracker::new(database, clock));

        Self {
            registry,
            inference,
            validators,
            blocks,
            alerting,
            node_health,
        }
    }
}
