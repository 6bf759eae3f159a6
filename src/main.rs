mod aml;
mod cache;
mod chain;
mod config;
mod confirmation;
mod db;
mod follower;
mod janitor;
mod metrics;
mod reconciler;
mod registry;
mod service;
mod wallet;

use std::sync::Arc;

use aml::heuristic::LocalHeuristic;
use aml::providers::{AmlBotProvider, AmlProvider, ChainalysisProvider, EllipticProvider};
use aml::AmlEvaluator;
use chain::ChainClientPool;
use config::Config;
use confirmation::ConfirmationTracker;
use follower::BlockFollower;
use janitor::OrderJanitor;
use reconciler::SettlementReconciler;
use registry::AddressRegistry;
use service::CoreService;
use wallet::WalletVault;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting deposit ingestion engine");

    let config = Config::load()?;
    tracing::info!(chain_id = config.chain.chain_id, ?config, "Configuration loaded");

    let db = db::create_pool(
        &config.database.url,
        config.database.pool_max,
        config.database.connect_timeout_secs,
    )
    .await?;
    tracing::info!("Database connected");

    db::run_migrations(&db).await?;
    tracing::info!("Database migrations complete");

    let chain = Arc::new(ChainClientPool::new(&config.chain.rpc_urls, &config.chain.ws_urls)?);

    let registry = Arc::new(AddressRegistry::warm(db.clone()).await?);

    let wallet_vault = Arc::new(WalletVault::new(
        config.wallet.seed_mnemonic.clone(),
        config.chain.chain_id,
        config.chain.blockchain_debug,
        db.clone(),
        chain.clone(),
    ));

    let providers: Vec<Box<dyn AmlProvider>> = vec![
        Box::new(ChainalysisProvider::new(
            config.aml.chainalysis_api_key.clone(),
            config.aml.chainalysis_url.clone(),
        )),
        Box::new(EllipticProvider::new(
            config.aml.elliptic_api_key.clone(),
            config.aml.elliptic_url.clone(),
        )),
        Box::new(AmlBotProvider::new(
            config.aml.amlbot_api_key.clone(),
            config.aml.amlbot_url.clone(),
        )),
    ];
    let aml_evaluator = Arc::new(AmlEvaluator::new(
        providers,
        LocalHeuristic::new(),
        &config.aml.transaction_threshold,
        config.aml.risk_cache_ttl_secs,
        db.clone(),
        config.aml.pending_check_recheck_interval_secs,
    )?);

    let confirmations = Arc::new(ConfirmationTracker::new(
        chain.clone(),
        db.clone(),
        config.chain.required_confirmations,
        config.settlement.confirmation_poll_interval_secs,
        config.settlement.confirmation_concurrency,
    ));

    let follower = BlockFollower::new(
        chain.clone(),
        registry.clone(),
        aml_evaluator.clone(),
        confirmations.clone(),
        db.clone(),
        config.chain.chain_id as i64,
        &config.chain.token_contract,
    )?;

    let reconciler = SettlementReconciler::new(
        db.clone(),
        config.chain.token_decimals,
        config.settlement.reconcile_interval_secs,
    );

    let janitor = OrderJanitor::new(
        db.clone(),
        config.settlement.order_expiration_minutes,
        config.settlement.order_cleanup_interval_secs,
    );

    // `CoreService` is consumed by the out-of-scope UI/API surface; wiring it
    // here keeps its collaborators alive for the lifetime of the process.
    let _service = CoreService::new(
        db.clone(),
        wallet_vault.clone(),
        registry.clone(),
        chain.clone(),
        &config.chain.token_contract,
    )?;

    tracing::info!("Components initialized, starting processing");

    let metrics_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.http_port));
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_addr).await {
            tracing::error!(error = %e, "metrics server error");
        }
    });

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    tokio::select! {
        _ = follower.run() => {
            tracing::error!("block follower task exited unexpectedly");
        }
        _ = reconciler.run() => {
            tracing::error!("settlement reconciler task exited unexpectedly");
        }
        _ = janitor.run() => {
            tracing::error!("order janitor task exited unexpectedly");
        }
        _ = aml_evaluator.run_pending_check_sweep() => {
            tracing::error!("AML pending check sweep task exited unexpectedly");
        }
        _ = shutdown_rx.recv() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("deposit ingestion engine stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,depositd=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
