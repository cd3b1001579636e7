//! Alert routes

use axum::{
    Router,
    routing::{get, post},
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use crate::alerts::{Alert, ConsensusAlerting};
use crate::api::routes::LimitParams;
use crate::error::{MonitorError, Result};

pub fn routes(alerting: Arc<ConsensusAlerting>) -> Router {
    Router::new()
        .route("/alerts", get(get_recent_alerts))
        .route("/alerts/unacknowledged", get(get_unacknowledged))
        .route("/alerts/:id/acknowledge", post(acknowledge))
        .with_state(alerting)
}

async fn get_recent_alerts(
    State(alerting): State<Arc<ConsensusAlerting>>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<Alert>>> {
    Ok(Json(alerting.get_recent_alerts(params.limit()).await?))
}

async fn get_unacknowledged(State(alerting): State<Arc<ConsensusAlerting>>) -> Result<Json<Vec<Alert>>> {
    Ok(Json(alerting.get_unacknowledged_alerts().await?))
}

async fn acknowledge(
    State(alerting): State<Arc<ConsensusAlerting>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    if !alerting.acknowledge_alert(id).await? {
        return Err(MonitorError::NotFound(format!("alert {}", id)));
    }
    Ok(Json(json!({ "id": id, "acknowledged": true })))
}
