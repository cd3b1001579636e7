//! Upstream data sources
//!
//! The orchestrator only sees these traits. Concrete clients talk to the
//! dashboard feed and geolocation provider over HTTP and to the chain
//! gateway over JSON-RPC.

pub mod cache;
pub mod dashboard;
pub mod geo;
pub mod pool;
pub mod rpc_client;
pub mod validators;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{BlockInfo, ChainValidator, GeoResult, NodeSummary, PeerInfo};

pub use cache::TtlCache;
pub use dashboard::HttpDashboardSource;
pub use geo::IpApiGeoProvider;
pub use pool::{with_timeout, BoundedPool, PoolOutcome};
pub use rpc_client::ChainRpcClient;
pub use validators::{ValidatorFetch, ValidatorFetcher};

#[async_trait]
pub trait DashboardSource: Send + Sync {
    async fn fetch_nodes(&self) -> Result<Vec<NodeSummary>>;
}

#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Peer id of the node this source is connected to.
    async fn get_node_id(&self) -> Result<String>;

    async fn get_peers(&self) -> Result<Vec<PeerInfo>>;

    async fn get_baker_ids(&self) -> Result<Vec<u64>>;

    async fn get_pool_info(&self, baker_id: u64) -> Result<ChainValidator>;

    async fn get_finalized_height(&self) -> Result<u64>;

    async fn get_block_at_height(&self, height: u64) -> Result<BlockInfo>;
}

#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// `Ok(None)` when the provider has no location for `ip`.
    async fn lookup(&self, ip: &str) -> Result<Option<GeoResult>>;
}
