//! End-to-end lifecycle tests driving the services directly against a real
//! SQLite file, including the worked 51-unit scenario.

use settleflow::config::Config;
use settleflow::db::init_db;
use settleflow::domain::{
    BatchState, ClosureState, CommissionModel, Decimal, SettlementConcept, SettlementState,
    TrancheState,
};
use settleflow::error::DomainError;
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

struct TestEnv {
    repo: Arc<Repository>,
    directory: Arc<InMemoryAgentDirectory>,
    reward_fund: Arc<RecordingRewardFund>,
    notifier: Arc<RecordingNotificationSink>,
    batches: BatchService,
    tranches: TrancheService,
    settlements: SettlementService,
    closure: ClosureService,
    bulk: BulkService,
    _temp: TempDir,
}

async fn setup() -> TestEnv {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("test.db").to_string_lossy().to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let config = Config {
        port: 0,
        database_path: db_path,
        unit_price: dec("2400"),
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
    let debts = Arc::new(InMemoryDebtSource::new());
    let notifier = Arc::new(RecordingNotificationSink::new());
    let reward_fund = Arc::new(RecordingRewardFund::new());

    TestEnv {
        batches: BatchService::new(
            repo.clone(),
            directory.clone(),
            reward_fund.clone(),
            notifier.clone(),
            config.clone(),
        ),
        tranches: TrancheService::new(repo.clone(), notifier.clone(), config.clone()),
        settlements: SettlementService::new(repo.clone(), notifier.clone()),
        closure: ClosureService::new(repo.clone(), notifier.clone()),
        bulk: BulkService::new(
            repo.clone(),
            directory.clone(),
            debts,
            reward_fund.clone(),
            notifier.clone(),
            config,
        ),
        repo,
        directory,
        reward_fund,
        notifier,
        _temp: temp,
    }
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// RELEASED -> IN_TRANSIT -> IN_HAND, the sweep plus delivery confirmation.
async fn bring_in_hand(env: &TestEnv, tranche_id: i64) {
    assert!(env.tranches.sweep_released().await.unwrap() >= 1);
    env.tranches
        .transition(tranche_id, TrancheState::InHand)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_batch_creation_shape() {
    let env = setup().await;
    env.directory.insert_active(7, None);

    let view = env
        .batches
        .create(7, 51, CommissionModel::FiftyFiftyCascade)
        .await
        .unwrap();

    assert_eq!(view.batch.state, BatchState::Created);
    assert_eq!(view.batch.total_investment, dec("122400"));
    assert_eq!(view.batch.operator_investment, dec("61200"));
    assert_eq!(view.batch.agent_investment, dec("61200"));
    let stocks: Vec<i64> = view.tranches.iter().map(|t| t.initial_stock).collect();
    assert_eq!(stocks, vec![17, 17, 17]);
    assert!(view
        .tranches
        .iter()
        .all(|t| t.state == TrancheState::Inactive));
    assert!(view
        .settlements
        .iter()
        .all(|s| s.state == SettlementState::Inactive));
    let closure = view.closure.unwrap();
    assert_eq!(closure.state, ClosureState::Inactive);
    assert_eq!(closure.tranche_id, view.tranches[2].id);
}

#[tokio::test]
async fn test_ineligible_agent_cannot_create() {
    let env = setup().await;
    // unknown agent
    assert!(matches!(
        env.batches.create(99, 10, CommissionModel::SixtyForty).await,
        Err(DomainError::EntityNotFound { .. })
    ));
}

#[tokio::test]
async fn test_fifty_one_unit_full_lifecycle() {
    let env = setup().await;
    env.directory.insert_active(7, None);

    let view = env
        .batches
        .create(7, 51, CommissionModel::FiftyFiftyCascade)
        .await
        .unwrap();
    let batch_id = view.batch.id;
    let t1 = view.tranches[0].id;
    let t2 = view.tranches[1].id;
    let t3 = view.tranches[2].id;

    let view = env.batches.activate(batch_id).await.unwrap();
    assert_eq!(view.batch.state, BatchState::Active);
    assert_eq!(view.tranches[0].state, TrancheState::Released);
    // activation funds the reward pool with the full investment
    assert_eq!(
        env.reward_fund.inflows(),
        vec![(dec("122400"), "batch_activation".to_string(), batch_id)]
    );

    // tranche 1: sell everything for exactly the operator investment
    bring_in_hand(&env, t1).await;
    let outcome = env.tranches.record_sale(t1, 17, dec("61200")).await.unwrap();
    assert_eq!(outcome.tranche.state, TrancheState::Finalized);
    assert_eq!(outcome.batch.money_collected, dec("61200"));
    let s1 = outcome.activated_settlement_id.expect("trigger at 61200");

    let settlement = env.settlements.get(s1).await.unwrap();
    assert_eq!(settlement.state, SettlementState::Pending);
    assert_eq!(settlement.expected_amount, dec("61200"));
    assert_eq!(settlement.concept, SettlementConcept::AdminInvestment);

    // confirming releases tranche 2
    let settlement = env.settlements.confirm(s1, dec("61200")).await.unwrap();
    assert_eq!(settlement.state, SettlementState::Succeeded);
    let tranche2 = env.repo.get_tranche(t2).await.unwrap().unwrap();
    assert_eq!(tranche2.state, TrancheState::Released);
    let batch = env.repo.get_batch(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.money_transferred, dec("61200"));
    assert_eq!(batch.operator_recovered, dec("61200"));

    // tranche 2: trigger at <=10% remaining stock
    bring_in_hand(&env, t2).await;
    let outcome = env.tranches.record_sale(t2, 16, dec("72000")).await.unwrap();
    let s2 = outcome.activated_settlement_id.expect("stock 1 of 17 <= 10%");
    let settlement = env.settlements.get(s2).await.unwrap();
    // accrued profit 133200 - 122400 = 10800, operator half = 5400
    assert_eq!(settlement.expected_amount, dec("5400"));
    assert_eq!(settlement.concept, SettlementConcept::Profit);

    env.settlements.confirm(s2, dec("5400")).await.unwrap();
    let tranche3 = env.repo.get_tranche(t3).await.unwrap().unwrap();
    assert_eq!(tranche3.state, TrancheState::Released);

    // drain the last unit of tranche 2; it self-finalizes without a trigger
    let outcome = env.tranches.record_sale(t2, 1, dec("4000")).await.unwrap();
    assert_eq!(outcome.tranche.state, TrancheState::Finalized);
    assert!(outcome.activated_settlement_id.is_none());

    // tranche 3: selling out activates both the settlement and the closure
    bring_in_hand(&env, t3).await;
    let outcome = env.tranches.record_sale(t3, 17, dec("68000")).await.unwrap();
    assert!(outcome.closure_activated);
    let s3 = outcome.activated_settlement_id.expect("stock 0 <= 20%");
    let settlement = env.settlements.get(s3).await.unwrap();
    // accrued profit 82800, operator half 41400, minus 5400 already claimed
    assert_eq!(settlement.expected_amount, dec("36000"));

    let closure = env.repo.get_closure_by_batch(batch_id).await.unwrap().unwrap();
    assert_eq!(closure.state, ClosureState::Pending);
    assert_eq!(closure.residual_amount, dec("138600")); // 205200 - 66600

    env.settlements.confirm(s3, dec("36000")).await.unwrap();

    let closure = env.closure.confirm(closure.id).await.unwrap();
    assert_eq!(closure.state, ClosureState::Succeeded);
    let batch = env.repo.get_batch(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.state, BatchState::Finalized);
    assert!(batch.finalized_at.is_some());
    let tranche3 = env.repo.get_tranche(t3).await.unwrap().unwrap();
    assert_eq!(tranche3.state, TrancheState::Finalized);

    // the agent heard about every settlement along the way
    let templates: Vec<String> = env.notifier.sent().into_iter().map(|(_, t)| t).collect();
    assert!(templates.contains(&"settlement_pending".to_string()));
    assert!(templates.contains(&"batch_finalized".to_string()));
}

#[tokio::test]
async fn test_settlement_shortfall_is_recorded_and_rejected() {
    let env = setup().await;
    env.directory.insert_active(7, None);

    let view = env
        .batches
        .create(7, 20, CommissionModel::SixtyForty)
        .await
        .unwrap();
    let batch_id = view.batch.id;
    let t1 = view.tranches[0].id;
    env.batches.activate(batch_id).await.unwrap();
    bring_in_hand(&env, t1).await;

    // stocks are 10/10; stock 1 of 10 crosses the 10% threshold
    let outcome = env.tranches.record_sale(t1, 9, dec("20000")).await.unwrap();
    let s1 = outcome.activated_settlement_id.unwrap();
    let settlement = env.settlements.get(s1).await.unwrap();
    assert_eq!(settlement.expected_amount, dec("24000"));

    let err = env.settlements.confirm(s1, dec("20000")).await.unwrap_err();
    match err {
        DomainError::InsufficientAmount {
            expected,
            received,
            shortfall,
            ..
        } => {
            assert_eq!(expected, dec("24000"));
            assert_eq!(received, dec("20000"));
            assert_eq!(shortfall, dec("4000"));
        }
        other => panic!("expected InsufficientAmount, got {other:?}"),
    }

    // still PENDING, shortfall persisted for later bulk absorption
    let settlement = env.settlements.get(s1).await.unwrap();
    assert_eq!(settlement.state, SettlementState::Pending);
    assert_eq!(settlement.shortfall, dec("4000"));
    assert_eq!(settlement.received_amount, Decimal::zero());

    // the full amount still settles
    let settlement = env.settlements.confirm(s1, dec("24000")).await.unwrap();
    assert_eq!(settlement.state, SettlementState::Succeeded);
    assert_eq!(settlement.shortfall, Decimal::zero());
}

#[tokio::test]
async fn test_manual_finalize_transition_is_rejected() {
    let env = setup().await;
    env.directory.insert_active(7, None);

    let view = env
        .batches
        .create(7, 20, CommissionModel::SixtyForty)
        .await
        .unwrap();
    env.batches.activate(view.batch.id).await.unwrap();
    let t1 = view.tranches[0].id;

    assert!(matches!(
        env.tranches.transition(t1, TrancheState::Finalized).await,
        Err(DomainError::InvalidStateTransition { .. })
    ));
    // skipping a step is also rejected
    assert!(matches!(
        env.tranches.transition(t1, TrancheState::InHand).await,
        Err(DomainError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn test_oversell_is_rejected() {
    let env = setup().await;
    env.directory.insert_active(7, None);

    let view = env
        .batches
        .create(7, 20, CommissionModel::SixtyForty)
        .await
        .unwrap();
    env.batches.activate(view.batch.id).await.unwrap();
    let t1 = view.tranches[0].id;
    bring_in_hand(&env, t1).await;

    let err = env
        .tranches
        .record_sale(t1, 11, dec("30000"))
        .await
        .unwrap_err();
    match err {
        DomainError::InsufficientStock {
            requested,
            available,
            ..
        } => {
            assert_eq!(requested, 11);
            assert_eq!(available, 10);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_settlement_confirm_single_winner() {
    let env = setup().await;
    env.directory.insert_active(7, None);

    let view = env
        .batches
        .create(7, 20, CommissionModel::SixtyForty)
        .await
        .unwrap();
    env.batches.activate(view.batch.id).await.unwrap();
    let t1 = view.tranches[0].id;
    bring_in_hand(&env, t1).await;
    let outcome = env.tranches.record_sale(t1, 9, dec("30000")).await.unwrap();
    let s1 = outcome.activated_settlement_id.unwrap();

    let first = env.settlements.confirm(s1, dec("24000")).await;
    assert!(first.is_ok());

    // the second confirmation sees SUCCEEDED and is rejected; batch
    // counters were applied exactly once
    let second = env.settlements.confirm(s1, dec("24000")).await;
    assert!(matches!(
        second,
        Err(DomainError::InvalidStateTransition { .. })
    ));
    let batch = env.repo.get_batch(view.batch.id).await.unwrap().unwrap();
    assert_eq!(batch.operator_recovered, dec("24000"));
    assert_eq!(batch.money_transferred, dec("24000"));
}

#[tokio::test]
async fn test_version_guard_rolls_back_stale_write() {
    use settleflow::db::repo::ConfirmSettlementWrite;
    use settleflow::domain::TimeMs;

    let env = setup().await;
    env.directory.insert_active(7, None);

    let view = env
        .batches
        .create(7, 20, CommissionModel::SixtyForty)
        .await
        .unwrap();
    env.batches.activate(view.batch.id).await.unwrap();
    let t1 = view.tranches[0].id;
    bring_in_hand(&env, t1).await;
    let outcome = env.tranches.record_sale(t1, 9, dec("24000")).await.unwrap();
    let s1 = outcome.activated_settlement_id.unwrap();

    let settlement = env.settlements.get(s1).await.unwrap();
    let batch = env.repo.get_batch(view.batch.id).await.unwrap().unwrap();
    let write = ConfirmSettlementWrite {
        settlement_id: s1,
        settlement_version: settlement.version,
        received_amount: dec("24000"),
        batch_id: batch.id,
        batch_version: batch.version,
        new_money_transferred: batch.money_transferred + dec("24000"),
        new_operator_recovered: batch.operator_recovered + dec("24000"),
        new_operator_profit_claimed: batch.operator_profit_claimed,
        release_tranche: None,
        activate_closure: None,
        events: vec![],
    };

    // same snapshot applied twice: first wins, the replay loses its guard
    assert!(env.repo.confirm_settlement(&write, TimeMs::now()).await.unwrap());
    assert!(!env.repo.confirm_settlement(&write, TimeMs::now()).await.unwrap());
}

#[tokio::test]
async fn test_bulk_create_requires_eligible_seller() {
    let env = setup().await;
    env.directory.insert_active(7, None);

    assert!(matches!(
        env.bulk
            .create(99, 10, dec("40000"), CommissionModel::SixtyForty, None)
            .await,
        Err(DomainError::EntityNotFound { .. })
    ));

    let bulk = env
        .bulk
        .create(7, 10, dec("40000"), CommissionModel::SixtyForty, Some("sale-1".into()))
        .await
        .unwrap();

    // same external id returns the same settlement
    let again = env
        .bulk
        .create(7, 10, dec("40000"), CommissionModel::SixtyForty, Some("sale-1".into()))
        .await
        .unwrap();
    assert_eq!(bulk.id, again.id);
}
