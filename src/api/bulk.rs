use super::batches::parse_model;
use super::AppState;
use crate::domain::{BulkSettlement, Decimal};
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBulkRequest {
    pub seller_id: i64,
    pub units: i64,
    pub gross_revenue: Decimal,
    pub commission_model: String,
    /// External sale id; requests carrying the same id are idempotent.
    pub bulk_sale_id: Option<String>,
}

pub async fn create_bulk(
    State(state): State<AppState>,
    Json(req): Json<CreateBulkRequest>,
) -> Result<(StatusCode, Json<BulkSettlement>), AppError> {
    if !req.gross_revenue.is_positive() {
        return Err(AppError::BadRequest("grossRevenue must be positive".into()));
    }
    let model = parse_model(&req.commission_model)?;
    let bulk = state
        .bulk
        .create(
            req.seller_id,
            req.units,
            req.gross_revenue,
            model,
            req.bulk_sale_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(bulk)))
}

pub async fn confirm_bulk(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BulkSettlement>, AppError> {
    Ok(Json(state.bulk.confirm(id).await?))
}

pub async fn get_bulk(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BulkSettlement>, AppError> {
    Ok(Json(state.bulk.get(id).await?))
}
