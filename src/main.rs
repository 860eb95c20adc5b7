#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod access;
mod cli;
mod config;
mod cron;
mod db;
mod feed;
mod relay;
mod tenancy;
mod utils;
mod web;

use cli::{Cli, Commands, CronJob};
use config::Config;
use cron::CronRunner;
use relay::{OutboxWorker, RelayEngine};
use tenancy::{TenantRegistry, TenantRouter};
use web::WebServer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Arc::new(Config::load_from_file(&cli.config)?);
    utils::logging::init_tracing(&config.logging.level, &config.logging.format);

    let registry = TenantRegistry::from_config(&config.tenants)?;

    match cli.command {
        Some(Commands::ValidateConfig) => {
            println!(
                "configuration OK ({} tenants registered)",
                registry.len()
            );
            return Ok(());
        }
        Some(Commands::ListTenants) => {
            println!("{}", cli::registry_summary(&registry));
            return Ok(());
        }
        Some(Commands::RunCron { job }) => {
            let router = build_router(&config, registry).await?;
            let runner = CronRunner::new(router, config.crons.clone());
            let report = match job {
                CronJob::Global => runner.run_global().await,
                CronJob::Tenant => runner.run_tenant().await,
                CronJob::Showcase => runner.run_showcase().await,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        None => {}
    }

    info!("superfeed server starting up");

    let router = build_router(&config, registry).await?;
    let relay_engine = Arc::new(RelayEngine::new(router.global()));
    let cron_runner = Arc::new(CronRunner::new(router.clone(), config.crons.clone()));

    let web_server = WebServer::new(
        config.clone(),
        router.clone(),
        relay_engine.clone(),
        cron_runner.clone(),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let worker = OutboxWorker::new(relay_engine, config.relay.clone(), shutdown_rx);
    let worker_handle = tokio::spawn(worker.run());

    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.start().await {
            error!("web server error: {}", e);
        }
    });

    tokio::pin!(web_handle);
    tokio::pin!(worker_handle);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, beginning shutdown");
        },
        _ = &mut web_handle => {
            info!("web server task exited, beginning shutdown");
        },
        _ = &mut worker_handle => {
            info!("relay worker task exited, beginning shutdown");
        },
    }

    let _ = shutdown_tx.send(true);
    web_handle.abort();

    info!("superfeed server shutting down");
    Ok(())
}

async fn build_router(config: &Config, registry: TenantRegistry) -> Result<Arc<TenantRouter>> {
    let global = Arc::new(db::DatabaseManager::new(&config.database).await?);
    global.migrate().await?;
    Ok(Arc::new(TenantRouter::new(global, registry)))
}
