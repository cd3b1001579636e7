//! Location inference for peers that were never geolocated directly
//!
//! A peer's position is approximated by the centroid of the reporters that
//! see it. More independent vantage points give more confidence, nothing
//! more clever than that.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::database::Database;
use crate::error::Result;
use crate::peers::PeerRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum LocationConfidence {
    Low,
    Medium,
    High,
}

impl LocationConfidence {
    pub fn from_source_count(count: usize) -> Option<LocationConfidence> {
        match count {
            0 => None,
            1 => Some(LocationConfidence::Low),
            2 => Some(LocationConfidence::Medium),
            _ => Some(LocationConfidence::High),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferredLocation {
    pub lat: f64,
    pub lon: f64,
    pub confidence: LocationConfidence,
    pub source_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceSummary {
    pub inferred: usize,
    pub failed: usize,
}

/// Unweighted centroid of `(lat, lon)` points.
pub fn centroid(points: &[(f64, f64)]) -> Option<InferredLocation> {
    let confidence = LocationConfidence::from_source_count(points.len())?;
    let n = points.len() as f64;
    let (lat_sum, lon_sum) = points
        .iter()
        .fold((0.0, 0.0), |(lat, lon), (p_lat, p_lon)| (lat + p_lat, lon + p_lon));

    Some(InferredLocation {
        lat: lat_sum / n,
        lon: lon_sum / n,
        confidence,
        source_count: points.len(),
    })
}

pub struct LocationInference {
    pool: sqlx::SqlitePool,
    registry: Arc<PeerRegistry>,
}

impl LocationInference {
    pub fn new(database: &Database, registry: Arc<PeerRegistry>) -> Self {
        Self {
            pool: database.pool().clone(),
            registry,
        }
    }

    /// `None` when no reporter of `peer_id` has a location.
    pub async fn infer_location(&self, peer_id: &str) -> Result<Option<InferredLocation>> {
        let points = sqlx::query_as::<_, (f64, f64)>(
            r#"
            SELECT r.geo_lat, r.geo_lon
            FROM peer_connections c
            INNER JOIN peers r ON r.id = c.reporter_id
            WHERE c.peer_id = ?
              AND r.geo_lat IS NOT NULL
              AND r.geo_lon IS NOT NULL
            "#,
        )
        .bind(peer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(centroid(&points))
    }

    /// Runs inference for every peer without a location and writes the
    /// results back. Peers with no located reporter count as `failed`.
    pub async fn infer_all_locations(&self) -> Result<InferenceSummary> {
        let candidates = sqlx::query_scalar::<_, String>(
            "SELECT id FROM peers WHERE geo_lat IS NULL OR geo_lon IS NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = InferenceSummary::default();
        for peer_id in candidates {
            match self.infer_location(&peer_id).await? {
                Some(location) => {
                    debug!(
                        peer_id = %peer_id,
                        lat = location.lat,
                        lon = location.lon,
                        sources = location.source_count,
                        "inferred peer location"
                    );
                    self.registry.set_inferred_location(&peer_id, &location).await?;
                    summary.inferred += 1;
                }
                None => summary.failed += 1,
            }
        }

        info!(inferred = summary.inferred, failed = summary.failed, "location inference complete");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::database::test_database;
    use crate::models::GeoResult;
    use crate::peers::{PeerSource, PeerUpdate};

    fn geo(lat: f64, lon: f64) -> GeoResult {
        GeoResult { country: None, city: None, lat, lon, isp: None }
    }

    async fn setup() -> (LocationInference, Arc<PeerRegistry>) {
        let db = test_database().await;
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let registry = Arc::new(PeerRegistry::new(&db, clock));
        (LocationInference::new(&db, registry.clone()), registry)
    }

    async fn located_reporter(registry: &PeerRegistry, id: &str, lat: f64, lon: f64) {
        registry.upsert_peer(id, PeerSource::Reporting, PeerUpdate::default()).await.unwrap();
        registry.update_geolocation(id, &geo(lat, lon)).await.unwrap();
    }

    #[test]
    fn test_confidence_by_count() {
        assert_eq!(LocationConfidence::from_source_count(0), None);
        assert_eq!(LocationConfidence::from_source_count(1), Some(LocationConfidence::Low));
        assert_eq!(LocationConfidence::from_source_count(2), Some(LocationConfidence::Medium));
        assert_eq!(LocationConfidence::from_source_count(3), Some(LocationConfidence::High));
        assert_eq!(LocationConfidence::from_source_count(12), Some(LocationConfidence::High));
    }

    #[test]
    fn test_centroid_of_european_capitals() {
        let location = centroid(&[(52.52, 13.405), (48.8566, 2.3522), (51.5074, -0.1278)]).unwrap();
        assert!((location.lat - 50.96).abs() < 0.01);
        assert!((location.lon - 5.21).abs() < 0.02);
        assert_eq!(location.confidence, LocationConfidence::High);
        assert!(centroid(&[]).is_none());
    }

    #[tokio::test]
    async fn test_infer_location_from_reporters() {
        let (inference, registry) = setup().await;
        registry.upsert_peer("hidden", PeerSource::Inferred, PeerUpdate::default()).await.unwrap();

        assert!(inference.infer_location("hidden").await.unwrap().is_none());

        located_reporter(&registry, "berlin", 52.52, 13.405).await;
        registry.record_connection("berlin", "hidden").await.unwrap();
        // A reporter without a location does not contribute.
        registry.upsert_peer("nowhere", PeerSource::Reporting, PeerUpdate::default()).await.unwrap();
        registry.record_connection("nowhere", "hidden").await.unwrap();

        let single = inference.infer_location("hidden").await.unwrap().unwrap();
        assert_eq!(single.confidence, LocationConfidence::Low);
        assert_eq!((single.lat, single.lon), (52.52, 13.405));

        located_reporter(&registry, "paris", 48.8566, 2.3522).await;
        located_reporter(&registry, "london", 51.5074, -0.1278).await;
        registry.record_connection("paris", "hidden").await.unwrap();
        registry.record_connection("london", "hidden").await.unwrap();

        let location = inference.infer_location("hidden").await.unwrap().unwrap();
        assert_eq!(location.source_count, 3);
        assert_eq!(location.confidence, LocationConfidence::High);
        assert!((location.lat - 50.96).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_infer_all_locations_writes_back() {
        let (inference, registry) = setup().await;
        located_reporter(&registry, "berlin", 52.52, 13.405).await;
        located_reporter(&registry, "paris", 48.8566, 2.3522).await;

        registry.upsert_peer("seen", PeerSource::Inferred, PeerUpdate::default()).await.unwrap();
        registry.upsert_peer("orphan", PeerSource::Inferred, PeerUpdate::default()).await.unwrap();
        registry.record_connection("berlin", "seen").await.unwrap();
        registry.record_connection("paris", "seen").await.unwrap();

        let summary = inference.infer_all_locations().await.unwrap();
        assert_eq!(summary, InferenceSummary { inferred: 1, failed: 1 });

        let seen = registry.get_peer("seen").await.unwrap().unwrap();
        assert_eq!(seen.geo_confidence, Some(LocationConfidence::Medium));
        assert!(seen.geo_updated.is_some());
        assert!((seen.geo_lat.unwrap() - 50.6883).abs() < 1e-3);
        assert!(seen.geo_country.is_none());

        let orphan = registry.get_peer("orphan").await.unwrap().unwrap();
        assert!(!orphan.has_location());
    }
}
