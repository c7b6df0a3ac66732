pub mod batches;
pub mod bulk;
pub mod closure;
pub mod health;
pub mod settlements;
pub mod tranches;

use crate::config::Config;
use crate::db::Repository;
use crate::service::{
    BatchService, BulkService, ClosureService, SettlementService, TrancheService,
};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Config,
    pub batches: Arc<BatchService>,
    pub tranches: Arc<TrancheService>,
    pub settlements: Arc<SettlementService>,
    pub bulk: Arc<BulkService>,
    pub closure: Arc<ClosureService>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/batches", post(batches::create_batch))
        .route("/v1/batches/:id", get(batches::get_batch))
        .route("/v1/batches/:id", delete(batches::cancel_batch))
        .route("/v1/batches/:id/activate", post(batches::activate_batch))
        .route("/v1/agents/:id/batches", get(batches::list_agent_batches))
        .route("/v1/tranches/:id", get(tranches::get_tranche))
        .route("/v1/tranches/:id/transition", post(tranches::transition))
        .route("/v1/tranches/:id/sales", post(tranches::record_sale))
        .route("/v1/settlements/:id", get(settlements::get_settlement))
        .route(
            "/v1/settlements/:id/confirm",
            post(settlements::confirm_settlement),
        )
        .route("/v1/bulk-settlements", post(bulk::create_bulk))
        .route("/v1/bulk-settlements/:id", get(bulk::get_bulk))
        .route("/v1/bulk-settlements/:id/confirm", post(bulk::confirm_bulk))
        .route(
            "/v1/closure-settlements/:id",
            get(closure::get_closure),
        )
        .route(
            "/v1/closure-settlements/:id/confirm",
            post(closure::confirm_closure),
        )
        .layer(cors)
        .with_state(state)
}
