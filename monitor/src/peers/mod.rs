//! Peer registry and connection graph

pub mod registry;
pub mod source;

use serde::{Deserialize, Serialize};

use crate::inference::LocationConfidence;

pub use registry::PeerRegistry;
pub use source::{PeerSource, PeerUpdate};

/// One network participant. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Peer {
    pub id: String,
    pub source: PeerSource,
    pub first_seen: i64,
    pub last_seen: i64,
    pub node_name: Option<String>,
    pub client_version: Option<String>,
    pub ip_address: Option<String>,
    pub port: Option<i64>,
    pub geo_country: Option<String>,
    pub geo_city: Option<String>,
    pub geo_lat: Option<f64>,
    pub geo_lon: Option<f64>,
    pub geo_isp: Option<String>,
    pub geo_updated: Option<i64>,
    /// Set when the location was inferred rather than looked up.
    pub geo_confidence: Option<LocationConfidence>,
    pub seen_by_count: i64,
    pub is_bootstrapper: bool,
    pub catchup_status: Option<String>,
    pub latency_ms: Option<i64>,
    pub packets_sent: Option<i64>,
    pub packets_received: Option<i64>,
    pub grpc_bootstrapper: Option<bool>,
}

impl Peer {
    pub fn has_location(&self) -> bool {
        self.geo_lat.is_some() && self.geo_lon.is_some()
    }
}

/// Directed "reporter observed peer" edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PeerConnection {
    pub reporter_id: String,
    pub peer_id: String,
    pub last_seen: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SourceCount {
    pub source: PeerSource,
    pub count: i64,
}
