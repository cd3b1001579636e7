//! Peer provenance and the observation merge rules

use serde::{Deserialize, Serialize};

use crate::peers::Peer;

/// Where a peer record came from.
///
/// Ordered as a small lattice: `Inferred` sits below both direct sources.
/// A direct observation always wins; an indirect one never demotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PeerSource {
    /// Self-reports to the dashboard.
    Reporting,
    /// Seen directly by the monitored node's chain endpoint.
    Grpc,
    /// Only known because another peer lists it.
    Inferred,
}

impl PeerSource {
    pub fn is_direct(self) -> bool {
        !matches!(self, PeerSource::Inferred)
    }

    pub fn merge(existing: PeerSource, incoming: PeerSource) -> PeerSource {
        if incoming.is_direct() {
            incoming
        } else {
            existing
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PeerSource::Reporting => "reporting",
            PeerSource::Grpc => "grpc",
            PeerSource::Inferred => "inferred",
        }
    }
}

/// Fields carried by a single observation of a peer. `None` means "not
/// observed this time", never "clear the value".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerUpdate {
    pub node_name: Option<String>,
    pub client_version: Option<String>,
    pub ip_address: Option<String>,
    pub port: Option<u16>,
    pub catchup_status: Option<String>,
    pub latency_ms: Option<u64>,
    pub packets_sent: Option<u64>,
    pub packets_received: Option<u64>,
    pub grpc_bootstrapper: Option<bool>,
}

impl Peer {
    /// Record for a peer observed for the first time at `now`.
    pub fn first_observation(id: &str, source: PeerSource, update: PeerUpdate, now: i64) -> Peer {
        let mut peer = Peer {
            id: id.to_string(),
            source,
            first_seen: now,
            last_seen: now,
            node_name: None,
            client_version: None,
            ip_address: None,
            port: None,
            geo_country: None,
            geo_city: None,
            geo_lat: None,
            geo_lon: None,
            geo_isp: None,
            geo_updated: None,
            geo_confidence: None,
            seen_by_count: 0,
            is_bootstrapper: false,
            catchup_status: None,
            latency_ms: None,
            packets_sent: None,
            packets_received: None,
            grpc_bootstrapper: None,
        };
        peer.apply(update);
        peer
    }

    /// Folds a later observation into an existing record. `first_seen` is
    /// left untouched.
    pub fn merge_observation(&mut self, source: PeerSource, update: PeerUpdate, now: i64) {
        self.source = PeerSource::merge(self.source, source);
        self.last_seen = self.last_seen.max(now);
        self.apply(update);
    }

    fn apply(&mut self, update: PeerUpdate) {
        keep_or_replace(&mut self.node_name, update.node_name);
        keep_or_replace(&mut self.client_version, update.client_version);
        keep_or_replace(&mut self.ip_address, update.ip_address);
        keep_or_replace(&mut self.port, update.port.map(i64::from));
        keep_or_replace(&mut self.catchup_status, update.catchup_status);
        keep_or_replace(&mut self.latency_ms, update.latency_ms.map(saturating_i64));
        keep_or_replace(&mut self.packets_sent, update.packets_sent.map(saturating_i64));
        keep_or_replace(&mut self.packets_received, update.packets_received.map(saturating_i64));
        keep_or_replace(&mut self.grpc_bootstrapper, update.grpc_bootstrapper);
    }
}

fn keep_or_replace<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_sources_win() {
        use PeerSource::*;
        assert_eq!(PeerSource::merge(Inferred, Grpc), Grpc);
        assert_eq!(PeerSource::merge(Inferred, Reporting), Reporting);
        assert_eq!(PeerSource::merge(Grpc, Reporting), Reporting);
        assert_eq!(PeerSource::merge(Reporting, Grpc), Grpc);
    }

    #[test]
    fn test_inferred_never_demotes() {
        use PeerSource::*;
        assert_eq!(PeerSource::merge(Reporting, Inferred), Reporting);
        assert_eq!(PeerSource::merge(Grpc, Inferred), Grpc);
        assert_eq!(PeerSource::merge(Inferred, Inferred), Inferred);
    }

    #[test]
    fn test_merge_keeps_existing_fields() {
        let mut peer = Peer::first_observation(
            "p1",
            PeerSource::Grpc,
            PeerUpdate {
                ip_address: Some("10.0.0.1".to_string()),
                port: Some(8888),
                ..Default::default()
            },
            100,
        );

        peer.merge_observation(
            PeerSource::Inferred,
            PeerUpdate {
                node_name: Some("alpha".to_string()),
                ..Default::default()
            },
            200,
        );

        assert_eq!(peer.source, PeerSource::Grpc);
        assert_eq!(peer.first_seen, 100);
        assert_eq!(peer.last_seen, 200);
        assert_eq!(peer.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(peer.port, Some(8888));
        assert_eq!(peer.node_name.as_deref(), Some("alpha"));
    }
}
