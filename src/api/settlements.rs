use super::AppState;
use crate::domain::{Decimal, Settlement};
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

pub async fn get_settlement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Settlement>, AppError> {
    Ok(Json(state.settlements.get(id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmSettlementRequest {
    pub amount: Decimal,
}

pub async fn confirm_settlement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ConfirmSettlementRequest>,
) -> Result<Json<Settlement>, AppError> {
    if req.amount.is_negative() {
        return Err(AppError::BadRequest("amount must not be negative".into()));
    }
    Ok(Json(state.settlements.confirm(id, req.amount).await?))
}
