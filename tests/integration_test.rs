use axum::http::StatusCode;
use settleflow::api::{self, AppState};
use settleflow::config::Config;
use settleflow::db::init_db;
use settleflow::domain::Decimal;
use settleflow::integrations::{
    InMemoryAgentDirectory, InMemoryDebtSource, RecordingNotificationSink, RecordingRewardFund,
};
use settleflow::service::{
    BatchService, BulkService, ClosureService, SettlementService, TrancheService,
};
use settleflow::Repository;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

async fn setup_test_app() -> (axum::Router, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();

    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let config = Config {
        port: 0,
        database_path: db_path,
        unit_price: Decimal::from_str("2400").unwrap(),
        operator_investment_pct: 50,
        operator_agent_id: 1,
        tranche_dwell_secs: 0,
        tranche_sweep_secs: 1,
        outbox_poll_secs: 1,
        outbox_batch_size: 20,
        outbox_max_retries: 3,
        outbox_backoff_cap_secs: 1,
        outbox_retention_days: 7,
    };

    let directory = Arc::new(InMemoryAgentDirectory::new());
    directory.insert_active(7, None);
    let debts = Arc::new(InMemoryDebtSource::new());
    let notifier = Arc::new(RecordingNotificationSink::new());
    let reward_fund = Arc::new(RecordingRewardFund::new());

    let batches = Arc::new(BatchService::new(
        repo.clone(),
        directory.clone(),
        reward_fund.clone(),
        notifier.clone(),
        config.clone(),
    ));
    let tranches = Arc::new(TrancheService::new(
        repo.clone(),
        notifier.clone(),
        config.clone(),
    ));
    let settlements = Arc::new(SettlementService::new(repo.clone(), notifier.clone()));
    let closure = Arc::new(ClosureService::new(repo.clone(), notifier.clone()));
    let bulk = Arc::new(BulkService::new(
        repo.clone(),
        directory,
        debts,
        reward_fund,
        notifier,
        config.clone(),
    ));

    let state = AppState {
        repo,
        config,
        batches,
        tranches,
        settlements,
        bulk,
        closure,
    };

    (api::create_router(state), temp_dir)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _temp) = setup_test_app().await;

    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/health")
        .body(axum::body::Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_create_batch_endpoint() {
    let (app, _temp) = setup_test_app().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/batches",
            serde_json::json!({
                "agentId": 7,
                "quantity": 51,
                "commissionModel": "50/50-cascade",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["batch"]["state"], "CREATED");
    assert_eq!(body["batch"]["total_investment"], 122400.0);
    assert_eq!(body["tranches"].as_array().unwrap().len(), 3);
    assert_eq!(body["settlements"].as_array().unwrap().len(), 3);
    assert_eq!(body["closure"]["state"], "INACTIVE");
}

#[tokio::test]
async fn test_create_batch_unknown_model_is_bad_request() {
    let (app, _temp) = setup_test_app().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/batches",
            serde_json::json!({
                "agentId": 7,
                "quantity": 10,
                "commissionModel": "70/30",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_batch_unknown_agent_is_not_found() {
    let (app, _temp) = setup_test_app().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/batches",
            serde_json::json!({
                "agentId": 99,
                "quantity": 10,
                "commissionModel": "60/40",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "ENTITY_NOT_FOUND");
}

#[tokio::test]
async fn test_activate_then_get_batch() {
    let (app, _temp) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/batches",
            serde_json::json!({
                "agentId": 7,
                "quantity": 20,
                "commissionModel": "60/40",
            }),
        ))
        .await
        .unwrap();
    let batch_id = body_json(response).await["batch"]["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/batches/{batch_id}/activate"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["batch"]["state"], "ACTIVE");
    assert_eq!(body["tranches"][0]["state"], "RELEASED");
    assert_eq!(body["tranches"][1]["state"], "INACTIVE");

    // double activation conflicts
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/v1/batches/{batch_id}/activate"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("GET")
                .uri(format!("/v1/batches/{batch_id}"))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cancel_created_batch() {
    let (app, _temp) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/batches",
            serde_json::json!({
                "agentId": 7,
                "quantity": 10,
                "commissionModel": "60/40",
            }),
        ))
        .await
        .unwrap();
    let batch_id = body_json(response).await["batch"]["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("DELETE")
                .uri(format!("/v1/batches/{batch_id}"))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("GET")
                .uri(format!("/v1/batches/{batch_id}"))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sale_on_unreleased_tranche_conflicts() {
    let (app, _temp) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/batches",
            serde_json::json!({
                "agentId": 7,
                "quantity": 20,
                "commissionModel": "60/40",
            }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    let tranche_id = body["tranches"][0]["id"].as_i64().unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/v1/tranches/{tranche_id}/sales"),
            serde_json::json!({ "quantity": 1, "amount": 3000.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
