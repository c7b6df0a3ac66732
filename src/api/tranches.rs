use super::AppState;
use crate::domain::{tranche::TrancheState, Decimal, Tranche};
use crate::error::{AppError, DomainError};
use crate::service::SaleOutcome;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

pub async fn get_tranche(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Tranche>, AppError> {
    let tranche = state
        .repo
        .get_tranche(id)
        .await?
        .ok_or(DomainError::EntityNotFound {
            entity: "tranche",
            id,
        })?;
    Ok(Json(tranche))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub target: String,
}

pub async fn transition(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<Tranche>, AppError> {
    let target = TrancheState::parse(&req.target)
        .ok_or_else(|| AppError::BadRequest(format!("unknown tranche state {:?}", req.target)))?;
    Ok(Json(state.tranches.transition(id, target).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRequest {
    pub quantity: i64,
    pub amount: Decimal,
}

pub async fn record_sale(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SaleRequest>,
) -> Result<Json<SaleOutcome>, AppError> {
    if !req.amount.is_positive() {
        return Err(AppError::BadRequest("amount must be positive".into()));
    }
    Ok(Json(state.tranches.record_sale(id, req.quantity, req.amount).await?))
}
