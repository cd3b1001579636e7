//! Peer registry routes

use axum::{
    Router,
    routing::get,
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use crate::error::{MonitorError, Result};
use crate::peers::{Peer, PeerConnection, PeerRegistry, PeerSource, SourceCount};

#[derive(Deserialize)]
struct PeerFilter {
    source: Option<PeerSource>,
}

pub fn routes(registry: Arc<PeerRegistry>) -> Router {
    Router::new()
        .route("/peers", get(list_peers))
        .route("/peers/bootstrappers", get(get_bootstrappers))
        .route("/peers/sources", get(count_by_source))
        .route("/peers/:id", get(get_peer))
        .route("/peers/:id/reporters", get(get_reporters))
        .with_state(registry)
}

async fn list_peers(
    State(registry): State<Arc<PeerRegistry>>,
    Query(filter): Query<PeerFilter>,
) -> Result<Json<Vec<Peer>>> {
    let peers = match filter.source {
        Some(source) => registry.get_peers_by_source(source).await?,
        None => registry.get_all_peers().await?,
    };
    Ok(Json(peers))
}

async fn get_bootstrappers(State(registry): State<Arc<PeerRegistry>>) -> Result<Json<Vec<Peer>>> {
    Ok(Json(registry.get_bootstrappers().await?))
}

async fn count_by_source(State(registry): State<Arc<PeerRegistry>>) -> Result<Json<Vec<SourceCount>>> {
    Ok(Json(registry.count_by_source().await?))
}

async fn get_peer(
    State(registry): State<Arc<PeerRegistry>>,
    Path(id): Path<String>,
) -> Result<Json<Peer>> {
    registry
        .get_peer(&id)
        .await?
        .map(Json)
        .ok_or_else(|| MonitorError::NotFound(format!("peer {}", id)))
}

async fn get_reporters(
    State(registry): State<Arc<PeerRegistry>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PeerConnection>>> {
    Ok(Json(registry.get_reporters_of(&id).await?))
}
