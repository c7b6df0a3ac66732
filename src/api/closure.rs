use super::AppState;
use crate::domain::ClosureSettlement;
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;

pub async fn get_closure(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ClosureSettlement>, AppError> {
    Ok(Json(state.closure.get(id).await?))
}

pub async fn confirm_closure(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ClosureSettlement>, AppError> {
    Ok(Json(state.closure.confirm(id).await?))
}
