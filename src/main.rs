//! Service entry: wires the ledger, render client, payment gateway and
//! notifier into the engine and waits for shutdown.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use videobot_engine::config::Config;
use videobot_engine::engine::VideoEngine;
use videobot_engine::idempotency::InMemoryIdempotency;
use videobot_engine::ledger::InMemoryLedger;
use videobot_engine::notifier::BotApiNotifier;
use videobot_engine::payments::{HttpPaymentGateway, PaymentReconciler};
use videobot_engine::render_api::KieClient;
use videobot_engine::task_registry::TaskRegistry;

#[derive(Debug, Parser)]
#[command(name = "videobot_engine")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Args::parse();
    let cfg = Config::load_from(&args.config).map_err(|e| anyhow::anyhow!(e))?;
    info!(config = %args.config, "configuration loaded");

    let ledger = Arc::new(InMemoryLedger::new());
    let idempotency = Arc::new(InMemoryIdempotency::new());
    let tasks = Arc::new(TaskRegistry::new());
    let render = Arc::new(KieClient::new(&cfg)?);
    let gateway = Arc::new(HttpPaymentGateway::new(&cfg)?);
    let notifier = Arc::new(BotApiNotifier::new(&cfg)?);

    let reconciler = Arc::new(PaymentReconciler::new(
        ledger.clone(),
        idempotency.clone(),
        gateway,
        notifier.clone(),
        tasks.clone(),
        cfg.clone(),
    ));

    let engine = VideoEngine::new(
        ledger,
        render,
        notifier,
        reconciler,
        tasks.clone(),
        cfg,
    );

    info!("engine ready");
    tokio::signal::ctrl_c().await?;

    info!(active_pollers = tasks.active_count(), "shutting down");
    engine.shutdown();

    Ok(())
}
