use super::AppState;
use crate::domain::{Batch, BatchState, CommissionModel};
use crate::error::AppError;
use crate::service::BatchView;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchRequest {
    pub agent_id: i64,
    pub quantity: i64,
    pub commission_model: String,
}

pub async fn create_batch(
    State(state): State<AppState>,
    Json(req): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<BatchView>), AppError> {
    let model = parse_model(&req.commission_model)?;
    let view = state.batches.create(req.agent_id, req.quantity, model).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn activate_batch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BatchView>, AppError> {
    Ok(Json(state.batches.activate(id).await?))
}

pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.batches.cancel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BatchView>, AppError> {
    Ok(Json(state.batches.view(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListBatchesQuery {
    pub state: Option<String>,
}

pub async fn list_agent_batches(
    State(state): State<AppState>,
    Path(agent_id): Path<i64>,
    Query(params): Query<ListBatchesQuery>,
) -> Result<Json<Vec<Batch>>, AppError> {
    let batch_state = match params.state.as_deref() {
        None => BatchState::Active,
        Some(raw) => BatchState::parse(raw)
            .ok_or_else(|| AppError::BadRequest(format!("unknown batch state {raw:?}")))?,
    };
    let batches = state
        .repo
        .list_batches_for_agent(agent_id, batch_state)
        .await?;
    Ok(Json(batches))
}

pub(super) fn parse_model(raw: &str) -> Result<CommissionModel, AppError> {
    CommissionModel::parse(raw)
        .ok_or_else(|| AppError::BadRequest(format!("unknown commission model {raw:?}")))
}
