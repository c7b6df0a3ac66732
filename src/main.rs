use settleflow::api;
use settleflow::config::Config;
use settleflow::db::init_db;
use settleflow::integrations::{
    AgentDirectory, EquipmentDebtSource, InMemoryAgentDirectory, InMemoryDebtSource,
    NotificationSink, RecordingNotificationSink, RecordingRewardFund, RewardFundLedger,
};
use settleflow::relay::{ClosureActivationHandler, EventBus, OutboxPoller};
use settleflow::service::{
    BatchService, BulkService, ClosureService, SettlementService, TrancheService,
};
use settleflow::Repository;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));

    // Collaborators. The in-process implementations stand in until the real
    // directory/debt integrations are wired up per deployment.
    let directory: Arc<dyn AgentDirectory> = Arc::new(InMemoryAgentDirectory::new());
    let debts: Arc<dyn EquipmentDebtSource> = Arc::new(InMemoryDebtSource::new());
    let notifier: Arc<dyn NotificationSink> = Arc::new(RecordingNotificationSink::new());
    let reward_fund: Arc<dyn RewardFundLedger> = Arc::new(RecordingRewardFund::new());

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
        directory.clone(),
        debts,
        reward_fund,
        notifier,
        config.clone(),
    ));

    // Relay: outbox poller feeding the in-process bus.
    let mut bus = EventBus::new();
    bus.register(Arc::new(ClosureActivationHandler::new(closure.clone())));
    let poller = Arc::new(OutboxPoller::new(
        repo.clone(),
        Arc::new(bus),
        config.clone(),
    ));
    poller.clone().spawn();
    poller.spawn_retention();
    tranches.clone().spawn_sweeper(config.tranche_sweep_secs);

    // Create router
    let app = api::create_router(api::AppState {
        repo,
        config,
        batches,
        tranches,
        settlements,
        bulk,
        closure,
    });

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
