//! Upstream data shapes consumed by the trackers
//!
//! These mirror what the dashboard feed, the chain gateway and the
//! geolocation provider return. Everything here is plain data; persistence
//! types live next to the tracker that owns them.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Non-negative stake amount in the chain's smallest unit.
///
/// Serialized as a decimal string, since amounts can exceed what JSON
/// numbers carry safely. Deserialization also accepts plain numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn as_f64(&self) -> f64 {
        self.0 as f64
    }

    /// `|new - self| / self`, or `None` when `self` is zero.
    pub fn change_ratio(&self, new: Amount) -> Option<f64> {
        if self.0 == 0 {
            return None;
        }
        let delta = self.0.abs_diff(new.0);
        Some(delta as f64 / self.0 as f64)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u128>().map(Amount)
    }
}

impl TryFrom<String> for Amount {
    type Error = ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount(value as u128)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse().map_err(de::Error::custom),
            Repr::Number(n) => Ok(Amount::from(n)),
        }
    }
}

/// One node as reported by the network dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub node_id: String,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub peers_count: u32,
    /// Peer ids this node is currently connected to.
    #[serde(default)]
    pub peers_list: Vec<String>,
    #[serde(default)]
    pub finalized_block_height: Option<u64>,
    #[serde(default)]
    pub consensus_running: bool,
    #[serde(default)]
    pub consensus_baker_id: Option<u64>,
    #[serde(default)]
    pub baking_committee_member: Option<String>,
    /// Node uptime in milliseconds.
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub average_ping: Option<f64>,
    #[serde(default)]
    pub average_bytes_per_second_in: Option<f64>,
    #[serde(default)]
    pub average_bytes_per_second_out: Option<f64>,
}

/// A peer of the monitored node, as returned by the chain gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub peer_id: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub catchup_status: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub packets_sent: Option<u64>,
    #[serde(default)]
    pub packets_received: Option<u64>,
    #[serde(default)]
    pub is_bootstrapper: bool,
}

/// Chain view of a single baker pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainValidator {
    pub baker_id: u64,
    pub account_address: String,
    pub equity_capital: Amount,
    pub delegated_capital: Amount,
    pub total_stake: Amount,
    /// Share of total effective stake, 0..=1.
    pub lottery_power: f64,
    #[serde(default)]
    pub baking_commission: f64,
    #[serde(default)]
    pub finalization_commission: f64,
    #[serde(default)]
    pub transaction_commission: f64,
    #[serde(default)]
    pub open_status: Option<String>,
    #[serde(default)]
    pub in_current_payday: bool,
    #[serde(default)]
    pub effective_stake: Option<Amount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    pub height: u64,
    #[serde(default)]
    pub baker_id: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
}

/// Successful geolocation lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoResult {
    pub country: Option<String>,
    pub city: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub isp: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_accepts_string_and_number() {
        let big: Amount = serde_json::from_str("\"340282366920938463463374607431768211455\"").unwrap();
        assert_eq!(big.0, u128::MAX);

        let small: Amount = serde_json::from_str("42").unwrap();
        assert_eq!(small, Amount(42));

        assert_eq!(serde_json::to_string(&Amount(7)).unwrap(), "\"7\"");
        assert!(serde_json::from_str::<Amount>("\"-1\"").is_err());
    }

    #[test]
    fn test_change_ratio() {
        assert_eq!(Amount(1000).change_ratio(Amount(1100)), Some(0.1));
        assert_eq!(Amount(1000).change_ratio(Amount(500)), Some(0.5));
        assert_eq!(Amount::ZERO.change_ratio(Amount(500)), None);
    }

    #[test]
    fn test_node_summary_defaults() {
        let node: NodeSummary = serde_json::from_str(
            r#"{"nodeId":"a1","nodeName":"alpha","consensusBakerId":7,"peersList":["b2"]}"#,
        )
        .unwrap();
        assert_eq!(node.node_id, "a1");
        assert_eq!(node.consensus_baker_id, Some(7));
        assert_eq!(node.peers_list, vec!["b2".to_string()]);
        assert!(!node.consensus_running);
        assert_eq!(node.uptime, None);
    }
}
