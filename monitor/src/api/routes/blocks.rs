//! Block production routes

use axum::{
    Router,
    routing::get,
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;
use crate::api::routes::{LimitParams, WindowParams};
use crate::blocks::{Block, BlockProducer, BlockProductionStats, BlockTracker};
use crate::error::Result;

pub fn routes(tracker: Arc<BlockTracker>) -> Router {
    Router::new()
        .route("/blocks/recent", get(get_recent_blocks))
        .route("/blocks/stats", get(get_production_stats))
        .route("/blocks/producers", get(get_top_producers))
        .route("/blocks/baker/:baker_id", get(get_blocks_by_baker))
        .with_state(tracker)
}

async fn get_recent_blocks(
    State(tracker): State<Arc<BlockTracker>>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<Block>>> {
    Ok(Json(tracker.get_recent_blocks(params.limit()).await?))
}

async fn get_production_stats(
    State(tracker): State<Arc<BlockTracker>>,
    Query(params): Query<WindowParams>,
) -> Result<Json<BlockProductionStats>> {
    Ok(Json(tracker.calculate_block_production_stats(params.window()).await?))
}

async fn get_top_producers(
    State(tracker): State<Arc<BlockTracker>>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<BlockProducer>>> {
    Ok(Json(tracker.get_top_block_producers(params.limit()).await?))
}

async fn get_blocks_by_baker(
    State(tracker): State<Arc<BlockTracker>>,
    Path(baker_id): Path<i64>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<Block>>> {
    Ok(Json(tracker.get_blocks_by_baker(baker_id, params.limit()).await?))
}
