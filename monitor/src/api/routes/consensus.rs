//! Consensus visibility routes

use axum::{
    Router,
    routing::get,
    extract::{Query, State},
    Json,
};
use std::sync::Arc;
use crate::alerts::{ConsensusAlerting, QuorumHealthRecord};
use crate::api::routes::LimitParams;
use crate::error::Result;
use crate::validators::{ConsensusSnapshot, ConsensusVisibility, ValidatorTracker};

#[derive(Clone)]
struct ConsensusState {
    validators: Arc<ValidatorTracker>,
    alerting: Arc<ConsensusAlerting>,
}

pub fn routes(validators: Arc<ValidatorTracker>, alerting: Arc<ConsensusAlerting>) -> Router {
    Router::new()
        .route("/consensus/visibility", get(get_visibility))
        .route("/consensus/snapshots", get(get_snapshots))
        .route("/consensus/quorum-health", get(get_quorum_health))
        .with_state(ConsensusState { validators, alerting })
}

async fn get_visibility(State(state): State<ConsensusState>) -> Result<Json<ConsensusVisibility>> {
    Ok(Json(state.validators.calculate_consensus_visibility().await?))
}

async fn get_snapshots(
    State(state): State<ConsensusState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<ConsensusSnapshot>>> {
    Ok(Json(state.validators.get_consensus_history(params.limit()).await?))
}

async fn get_quorum_health(
    State(state): State<ConsensusState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<QuorumHealthRecord>>> {
    Ok(Json(state.alerting.get_quorum_health_history(params.limit()).await?))
}
