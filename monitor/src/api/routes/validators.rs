//! Validator routes

use axum::{
    Router,
    routing::get,
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;
use crate::api::routes::LimitParams;
use crate::error::{MonitorError, Result};
use crate::validators::{Validator, ValidatorTracker, ValidatorTransition};

pub fn routes(tracker: Arc<ValidatorTracker>) -> Router {
    Router::new()
        .route("/validators", get(list_validators))
        .route("/validators/phantom", get(list_phantom))
        .route("/validators/visible", get(list_visible))
        .route("/validators/transitions", get(recent_transitions))
        .route("/validators/:baker_id", get(get_validator))
        .route("/validators/:baker_id/history", get(get_history))
        .with_state(tracker)
}

async fn list_validators(State(tracker): State<Arc<ValidatorTracker>>) -> Result<Json<Vec<Validator>>> {
    Ok(Json(tracker.get_all_validators().await?))
}

async fn list_phantom(State(tracker): State<Arc<ValidatorTracker>>) -> Result<Json<Vec<Validator>>> {
    Ok(Json(tracker.get_phantom_validators().await?))
}

async fn list_visible(State(tracker): State<Arc<ValidatorTracker>>) -> Result<Json<Vec<Validator>>> {
    Ok(Json(tracker.get_visible_validators().await?))
}

async fn recent_transitions(
    State(tracker): State<Arc<ValidatorTracker>>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<ValidatorTransition>>> {
    Ok(Json(tracker.get_recent_transitions(params.limit()).await?))
}

async fn get_validator(
    State(tracker): State<Arc<ValidatorTracker>>,
    Path(baker_id): Path<i64>,
) -> Result<Json<Validator>> {
    tracker
        .get_validator(baker_id)
        .await?
        .map(Json)
        .ok_or_else(|| MonitorError::NotFound(format!("validator {}", baker_id)))
}

async fn get_history(
    State(tracker): State<Arc<ValidatorTracker>>,
    Path(baker_id): Path<i64>,
) -> Result<Json<Vec<ValidatorTransition>>> {
    Ok(Json(tracker.get_validator_history(baker_id).await?))
}
