//! Error taxonomy for the settlement core.
//!
//! Domain failures carry a stable code plus structured details so callers can
//! branch programmatically; free-text is only for humans reading logs.

use crate::domain::Decimal;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Business-rule failures surfaced by the service layer.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid state transition for {entity} {id}: {from} -> {requested}")]
    InvalidStateTransition {
        entity: &'static str,
        id: i64,
        from: String,
        requested: String,
    },
    #[error("insufficient stock on tranche {tranche_id}: requested {requested}, available {available}")]
    InsufficientStock {
        tranche_id: i64,
        requested: i64,
        available: i64,
    },
    #[error("insufficient amount for settlement {settlement_id}: expected {expected}, received {received}, shortfall {shortfall}")]
    InsufficientAmount {
        settlement_id: i64,
        expected: Decimal,
        received: Decimal,
        shortfall: Decimal,
    },
    #[error("{entity} {id} not found")]
    EntityNotFound { entity: &'static str, id: i64 },
    #[error("concurrent update on {entity} {id}, retry")]
    ConcurrencyConflict { entity: &'static str, id: i64 },
    #[error("agent {agent_id} is not eligible: {reason}")]
    IneligibleAgent { agent_id: i64, reason: String },
    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl DomainError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            DomainError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            DomainError::InsufficientAmount { .. } => "INSUFFICIENT_AMOUNT",
            DomainError::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            DomainError::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            DomainError::IneligibleAgent { .. } => "INELIGIBLE_AGENT",
            DomainError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            DomainError::Db(_) => "STORAGE_ERROR",
        }
    }

    /// Structured detail payload for API responses.
    pub fn details(&self) -> serde_json::Value {
        match self {
            DomainError::InvalidStateTransition {
                entity,
                id,
                from,
                requested,
            } => json!({ "entity": entity, "id": id, "from": from, "requested": requested }),
            DomainError::InsufficientStock {
                tranche_id,
                requested,
                available,
            } => json!({ "trancheId": tranche_id, "requested": requested, "available": available }),
            DomainError::InsufficientAmount {
                settlement_id,
                expected,
                received,
                shortfall,
            } => json!({
                "settlementId": settlement_id,
                "expected": expected,
                "received": received,
                "shortfall": shortfall,
            }),
            DomainError::EntityNotFound { entity, id } => json!({ "entity": entity, "id": id }),
            DomainError::ConcurrencyConflict { entity, id } => {
                json!({ "entity": entity, "id": id })
            }
            DomainError::IneligibleAgent { agent_id, reason } => {
                json!({ "agentId": agent_id, "reason": reason })
            }
            DomainError::InvalidArgument { field, reason } => {
                json!({ "field": field, "reason": reason })
            }
            DomainError::Db(_) => json!({}),
        }
    }
}

/// Axum-facing error wrapper.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Domain(DomainError::Db(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            AppError::Domain(e) => {
                let status = match e {
                    DomainError::EntityNotFound { .. } => StatusCode::NOT_FOUND,
                    DomainError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
                    DomainError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
                    DomainError::InsufficientStock { .. }
                    | DomainError::InsufficientAmount { .. }
                    | DomainError::IneligibleAgent { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    DomainError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
                    DomainError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.code(), e.to_string(), e.details())
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), json!({}))
            }
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                msg.clone(),
                json!({}),
            ),
        };

        let body = Json(json!({
            "code": code,
            "error": message,
            "details": details,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_codes_are_stable() {
        let err = DomainError::InsufficientStock {
            tranche_id: 3,
            requested: 20,
            available: 17,
        };
        assert_eq!(err.code(), "INSUFFICIENT_STOCK");
        assert_eq!(err.details()["available"], 17);
    }

    #[test]
    fn test_insufficient_amount_carries_shortfall() {
        let err = DomainError::InsufficientAmount {
            settlement_id: 1,
            expected: Decimal::from_str("61200").unwrap(),
            received: Decimal::from_str("60000").unwrap(),
            shortfall: Decimal::from_str("1200").unwrap(),
        };
        let details = err.details();
        assert_eq!(details["shortfall"], 1200.0);
    }
}
