//! Reporting node health routes

use axum::{
    Router,
    routing::get,
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;
use crate::api::routes::{LimitParams, WindowParams};
use crate::error::Result;
use crate::node_health::{NodeHealthRecord, NodeHealthTracker, NodeRestart};

pub fn routes(tracker: Arc<NodeHealthTracker>) -> Router {
    Router::new()
        .route("/nodes/restarts", get(get_restarted_nodes))
        .route("/nodes/:node_id/health", get(get_node_health))
        .with_state(tracker)
}

async fn get_node_health(
    State(tracker): State<Arc<NodeHealthTracker>>,
    Path(node_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<NodeHealthRecord>>> {
    Ok(Json(tracker.get_node_health_history(&node_id, params.limit()).await?))
}

async fn get_restarted_nodes(
    State(tracker): State<Arc<NodeHealthTracker>>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Vec<NodeRestart>>> {
    Ok(Json(tracker.get_restarted_nodes(params.window()).await?))
}
