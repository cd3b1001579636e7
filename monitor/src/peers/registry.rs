//! Durable peer store
//!
//! Every known participant gets one row, whichever feed saw it first. The
//! connection graph lives alongside it because `seen_by_count` and location
//! inference are both derived from it.

use std::sync::Arc;

use chrono::Duration;
use tracing::debug;

use crate::clock::Clock;
use crate::database::Database;
use crate::error::Result;
use crate::inference::InferredLocation;
use crate::models::GeoResult;
use crate::peers::{Peer, PeerConnection, PeerSource, PeerUpdate, SourceCount};

const PEER_COLUMNS: &str = r#"
    id, source, first_seen, last_seen, node_name, client_version, ip_address, port,
    geo_country, geo_city, geo_lat, geo_lon, geo_isp, geo_updated, geo_confidence,
    seen_by_count, is_bootstrapper, catchup_status, latency_ms, packets_sent,
    packets_received, grpc_bootstrapper
"#;

pub struct PeerRegistry {
    pool: sqlx::SqlitePool,
    clock: Arc<dyn Clock>,
}

impl PeerRegistry {
    pub fn new(database: &Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool: database.pool().clone(),
            clock,
        }
    }

    /// Insert-or-update. Reading, merging and writing back is not atomic;
    /// polling is single-threaded and every step is safe to repeat.
    pub async fn upsert_peer(&self, id: &str, source: PeerSource, update: PeerUpdate) -> Result<Peer> {
        let now = self.clock.now_millis();

        let peer = match self.get_peer(id).await? {
            Some(mut existing) => {
                existing.merge_observation(source, update, now);
                existing
            }
            None => {
                debug!(peer_id = id, source = source.as_str(), "new peer");
                Peer::first_observation(id, source, update, now)
            }
        };

        sqlx::query(
            r#"
            INSERT INTO peers (
                id, source, first_seen, last_seen, node_name, client_version,
                ip_address, port, catchup_status, latency_ms, packets_sent,
                packets_received, grpc_bootstrapper
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT (id) DO UPDATE SET
                source = excluded.source,
                last_seen = excluded.last_seen,
                node_name = excluded.node_name,
                client_version = excluded.client_version,
                ip_address = excluded.ip_address,
                port = excluded.port,
                catchup_status = excluded.catchup_status,
                latency_ms = excluded.latency_ms,
                packets_sent = excluded.packets_sent,
                packets_received = excluded.packets_received,
                grpc_bootstrapper = excluded.grpc_bootstrapper
            "#,
        )
        .bind(&peer.id)
        .bind(peer.source)
        .bind(peer.first_seen)
        .bind(peer.last_seen)
        .bind(&peer.node_name)
        .bind(&peer.client_version)
        .bind(&peer.ip_address)
        .bind(peer.port)
        .bind(&peer.catchup_status)
        .bind(peer.latency_ms)
        .bind(peer.packets_sent)
        .bind(peer.packets_received)
        .bind(peer.grpc_bootstrapper)
        .execute(&self.pool)
        .await?;

        Ok(peer)
    }

    /// Inserts or refreshes the edge `reporter -> peer`. Self-edges are
    /// ignored and reported as `false`.
    pub async fn record_connection(&self, reporter_id: &str, peer_id: &str) -> Result<bool> {
        if reporter_id == peer_id {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO peer_connections (reporter_id, peer_id, last_seen)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (reporter_id, peer_id) DO UPDATE SET
                last_seen = excluded.last_seen
            "#,
        )
        .bind(reporter_id)
        .bind(peer_id)
        .bind(self.clock.now_millis())
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    /// Recomputes `seen_by_count` as the in-degree of every peer.
    pub async fn refresh_seen_by_counts(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE peers SET seen_by_count = (
                SELECT COUNT(*) FROM peer_connections c WHERE c.peer_id = peers.id
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn get_peer(&self, id: &str) -> Result<Option<Peer>> {
        let peer = sqlx::query_as::<_, Peer>(&format!("SELECT {PEER_COLUMNS} FROM peers WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(peer)
    }

    pub async fn get_all_peers(&self) -> Result<Vec<Peer>> {
        let peers = sqlx::query_as::<_, Peer>(&format!(
            "SELECT {PEER_COLUMNS} FROM peers ORDER BY last_seen DESC, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(peers)
    }

    pub async fn get_peers_by_source(&self, source: PeerSource) -> Result<Vec<Peer>> {
        let peers = sqlx::query_as::<_, Peer>(&format!(
            "SELECT {PEER_COLUMNS} FROM peers WHERE source = ? ORDER BY last_seen DESC, id"
        ))
        .bind(source)
        .fetch_all(&self.pool)
        .await?;

        Ok(peers)
    }

    pub async fn get_bootstrappers(&self) -> Result<Vec<Peer>> {
        let peers = sqlx::query_as::<_, Peer>(&format!(
            "SELECT {PEER_COLUMNS} FROM peers WHERE is_bootstrapper = TRUE ORDER BY seen_by_count DESC, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(peers)
    }

    pub async fn count_by_source(&self) -> Result<Vec<SourceCount>> {
        let counts = sqlx::query_as::<_, SourceCount>(
            "SELECT source, COUNT(*) AS count FROM peers GROUP BY source ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    /// Edges pointing at `peer_id`, most recent first.
    pub async fn get_reporters_of(&self, peer_id: &str) -> Result<Vec<PeerConnection>> {
        let edges = sqlx::query_as::<_, PeerConnection>(
            r#"
            SELECT reporter_id, peer_id, last_seen
            FROM peer_connections
            WHERE peer_id = ?
            ORDER BY last_seen DESC, reporter_id
            "#,
        )
        .bind(peer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(edges)
    }

    /// Work queue for the geolocation lookup: peers with an address and no
    /// looked-up location, an inferred one, or one older than `stale_days`.
    pub async fn get_peers_needing_geo_lookup(&self, stale_days: i64) -> Result<Vec<Peer>> {
        let cutoff = (self.clock.now() - Duration::days(stale_days)).timestamp_millis();

        let peers = sqlx::query_as::<_, Peer>(&format!(
            r#"
            SELECT {PEER_COLUMNS} FROM peers
            WHERE ip_address IS NOT NULL
              AND (
                geo_lat IS NULL
                OR geo_updated IS NULL
                OR geo_updated < ?
                OR geo_confidence IS NOT NULL
              )
            ORDER BY last_seen DESC, id
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(peers)
    }

    /// Stores a direct lookup result. Returns `false` for an unknown peer.
    pub async fn update_geolocation(&self, id: &str, geo: &GeoResult) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE peers SET
                geo_country = ?1,
                geo_city = ?2,
                geo_lat = ?3,
                geo_lon = ?4,
                geo_isp = ?5,
                geo_updated = ?6,
                geo_confidence = NULL
            WHERE id = ?7
            "#,
        )
        .bind(&geo.country)
        .bind(&geo.city)
        .bind(geo.lat)
        .bind(geo.lon)
        .bind(&geo.isp)
        .bind(self.clock.now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Stores an inferred location. Country, city and ISP stay empty.
    pub async fn set_inferred_location(&self, id: &str, location: &InferredLocation) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE peers SET
                geo_lat = ?1,
                geo_lon = ?2,
                geo_updated = ?3,
                geo_confidence = ?4
            WHERE id = ?5
            "#,
        )
        .bind(location.lat)
        .bind(location.lon)
        .bind(self.clock.now_millis())
        .bind(location.confidence)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Clears every bootstrapper flag, then flags peers seen by at least
    /// `min_seen_by` reporters whose `first_seen` is older than
    /// `min_age_days`. Returns how many were flagged.
    pub async fn detect_bootstrappers(&self, min_seen_by: i64, min_age_days: i64) -> Result<u64> {
        self.refresh_seen_by_counts().await?;

        let cutoff = (self.clock.now() - Duration::days(min_age_days)).timestamp_millis();

        sqlx::query("UPDATE peers SET is_bootstrapper = FALSE")
            .execute(&self.pool)
            .await?;

        let result = sqlx::query(
            r#"
            UPDATE peers SET is_bootstrapper = TRUE
            WHERE seen_by_count >= ? AND first_seen < ?
            "#,
        )
        .bind(min_seen_by)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::database::test_database;

    async fn registry() -> (PeerRegistry, Arc<ManualClock>) {
        let db = test_database().await;
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        (PeerRegistry::new(&db, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_upsert_preserves_first_seen_and_source() {
        let (registry, clock) = registry().await;

        registry
            .upsert_peer(
                "p1",
                PeerSource::Reporting,
                PeerUpdate {
                    node_name: Some("alpha".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let first_seen = clock.now_millis();

        clock.advance(Duration::minutes(5));
        let peer = registry
            .upsert_peer("p1", PeerSource::Inferred, PeerUpdate::default())
            .await
            .unwrap();

        assert_eq!(peer.source, PeerSource::Reporting);
        assert_eq!(peer.first_seen, first_seen);
        assert_eq!(peer.last_seen, clock.now_millis());
        assert_eq!(peer.node_name.as_deref(), Some("alpha"));

        let stored = registry.get_peer("p1").await.unwrap().unwrap();
        assert_eq!(stored, peer);
    }

    #[tokio::test]
    async fn test_inferred_peer_is_upgraded() {
        let (registry, _clock) = registry().await;

        registry.upsert_peer("p2", PeerSource::Inferred, PeerUpdate::default()).await.unwrap();
        registry
            .upsert_peer(
                "p2",
                PeerSource::Grpc,
                PeerUpdate {
                    ip_address: Some("192.0.2.10".to_string()),
                    latency_ms: Some(42),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let peer = registry.get_peer("p2").await.unwrap().unwrap();
        assert_eq!(peer.source, PeerSource::Grpc);
        assert_eq!(peer.latency_ms, Some(42));

        let counts = registry.count_by_source().await.unwrap();
        assert_eq!(counts, vec![SourceCount { source: PeerSource::Grpc, count: 1 }]);
    }

    #[tokio::test]
    async fn test_connections_are_deduplicated() {
        let (registry, clock) = registry().await;
        registry.upsert_peer("target", PeerSource::Inferred, PeerUpdate::default()).await.unwrap();

        assert!(registry.record_connection("r1", "target").await.unwrap());
        clock.advance(Duration::seconds(30));
        assert!(registry.record_connection("r1", "target").await.unwrap());
        assert!(registry.record_connection("r2", "target").await.unwrap());
        assert!(!registry.record_connection("target", "target").await.unwrap());

        let edges = registry.get_reporters_of("target").await.unwrap();
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|e| e.last_seen == clock.now_millis()));

        registry.refresh_seen_by_counts().await.unwrap();
        let peer = registry.get_peer("target").await.unwrap().unwrap();
        assert_eq!(peer.seen_by_count, 2);
    }

    #[tokio::test]
    async fn test_detect_bootstrappers_requires_age_and_popularity() {
        let (registry, clock) = registry().await;

        registry.upsert_peer("veteran", PeerSource::Grpc, PeerUpdate::default()).await.unwrap();
        clock.advance(Duration::days(10));
        registry.upsert_peer("newcomer", PeerSource::Grpc, PeerUpdate::default()).await.unwrap();
        registry.upsert_peer("quiet", PeerSource::Grpc, PeerUpdate::default()).await.unwrap();

        for i in 0..15 {
            let reporter = format!("r{i}");
            registry.record_connection(&reporter, "veteran").await.unwrap();
            registry.record_connection(&reporter, "newcomer").await.unwrap();
        }
        registry.record_connection("r0", "quiet").await.unwrap();

        let flagged = registry.detect_bootstrappers(10, 7).await.unwrap();
        assert_eq!(flagged, 1);

        let veteran = registry.get_peer("veteran").await.unwrap().unwrap();
        assert_eq!(veteran.seen_by_count, 15);
        assert!(veteran.is_bootstrapper);

        let newcomer = registry.get_peer("newcomer").await.unwrap().unwrap();
        assert_eq!(newcomer.seen_by_count, 15);
        assert!(!newcomer.is_bootstrapper);

        let bootstrappers = registry.get_bootstrappers().await.unwrap();
        assert_eq!(bootstrappers.len(), 1);
        assert_eq!(bootstrappers[0].id, "veteran");
    }

    #[tokio::test]
    async fn test_detect_bootstrappers_resets_stale_flags() {
        let (registry, clock) = registry().await;
        registry.upsert_peer("p", PeerSource::Grpc, PeerUpdate::default()).await.unwrap();
        registry.record_connection("r1", "p").await.unwrap();
        clock.advance(Duration::days(30));

        assert_eq!(registry.detect_bootstrappers(1, 7).await.unwrap(), 1);
        assert_eq!(registry.detect_bootstrappers(5, 7).await.unwrap(), 0);
        assert!(registry.get_bootstrappers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_geo_lookup_queue() {
        let (registry, clock) = registry().await;
        let with_ip = |ip: &str| PeerUpdate {
            ip_address: Some(ip.to_string()),
            ..Default::default()
        };

        registry.upsert_peer("no-ip", PeerSource::Inferred, PeerUpdate::default()).await.unwrap();
        registry.upsert_peer("fresh", PeerSource::Grpc, with_ip("192.0.2.1")).await.unwrap();
        registry.upsert_peer("stale", PeerSource::Grpc, with_ip("192.0.2.2")).await.unwrap();
        registry.upsert_peer("unknown", PeerSource::Grpc, with_ip("192.0.2.3")).await.unwrap();

        let geo = GeoResult {
            country: Some("Germany".to_string()),
            city: Some("Berlin".to_string()),
            lat: 52.52,
            lon: 13.405,
            isp: None,
        };
        registry.update_geolocation("stale", &geo).await.unwrap();
        clock.advance(Duration::days(8));
        registry.update_geolocation("fresh", &geo).await.unwrap();
        assert!(!registry.update_geolocation("missing", &geo).await.unwrap());

        let queue = registry.get_peers_needing_geo_lookup(7).await.unwrap();
        let mut ids: Vec<_> = queue.iter().map(|p| p.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["stale", "unknown"]);

        let fresh = registry.get_peer("fresh").await.unwrap().unwrap();
        assert_eq!(fresh.geo_city.as_deref(), Some("Berlin"));
        assert_eq!(fresh.geo_updated, Some(clock.now_millis()));
    }
}
