pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod integrations;
pub mod relay;
pub mod service;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    Batch, BatchState, BulkSettlement, BulkSettlementState, ClosureSettlement, ClosureState,
    CommissionModel, Decimal, DomainEvent, Settlement, SettlementState, TimeMs, Tranche,
    TrancheState,
};
pub use error::{AppError, DomainError};
