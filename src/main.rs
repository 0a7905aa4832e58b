//! netsentry - scheduled multi-protocol reachability prober.
//!
//! One invocation tests every configured target and exits; an external
//! timer provides the schedule.

mod alert;
mod config;
mod health;
mod mtu;
mod probe;
mod runner;
mod store;
mod target;

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alert::{AlertDispatcher, SendmailMailer};
use config::Config;
use health::{HealthReporter, HealthStatus};
use probe::NativeProbe;
use runner::TestRunner;
use store::{prune_results, ResultStore, RunSummary};
use target::Target;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "netsentry=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("run aborted: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let config = Arc::new(Config::load()?);
    tracing::info!(
        "starting netsentry {} with {} configured targets",
        env!("CARGO_PKG_VERSION"),
        config.targets.len()
    );

    let health = HealthReporter::new(config.health_file.clone(), config.targets.len());
    if let Err(e) = health.write(HealthStatus::Starting) {
        tracing::warn!("could not write health file: {e}");
    }

    // Invalid targets are rejected before any probe runs; they count as
    // failures for alerting. Zero valid targets aborts the run.
    let mut summary = RunSummary {
        targets_total: config.targets.len(),
        ..RunSummary::default()
    };
    let mut targets = Vec::new();
    for raw in &config.targets {
        match Target::parse(raw) {
            Ok(target) => targets.push(target),
            Err(e) => {
                tracing::error!("rejecting target {raw:?}: {e}");
                summary.record_failure(raw);
            }
        }
    }
    if targets.is_empty() {
        let _ = health.write(HealthStatus::Failed);
        return Err("no valid targets configured".into());
    }

    let store = match ResultStore::open(&config.results_dir, &config.file_prefix) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            let _ = health.write(HealthStatus::Failed);
            return Err(e.into());
        }
    };

    let probe = Arc::new(NativeProbe::new());
    let runner = Arc::new(TestRunner::new(probe, config.clone()));

    // Bounded worker pool over the targets.
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_targets));
    let mut tasks = JoinSet::new();
    for target in targets {
        let runner = runner.clone();
        let store = store.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (target.raw().to_string(), false),
            };
            tracing::info!("testing {}", target.raw());
            let result = runner.run(&target).await;
            let reachable = result.is_reachable();
            store.append(result).await;
            (target.raw().to_string(), reachable)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, true)) => tracing::info!("{name}: reachable"),
            Ok((name, false)) => {
                tracing::warn!("{name}: unreachable");
                summary.record_failure(&name);
            }
            Err(e) => tracing::error!("target task failed: {e}"),
        }
    }

    if let Err(e) = store.finalize().await {
        // The document stays unterminated; the next run repairs it.
        tracing::error!("could not finalize result document: {e}");
    }

    prune_results(&config.results_dir, config.retention_days, Utc::now());

    let ok = summary.all_reachable();
    if !ok {
        tracing::warn!(
            "{} of {} targets unreachable",
            summary.failed_targets.len(),
            summary.targets_total
        );
        AlertDispatcher::new(config.alerts.clone(), SendmailMailer)
            .dispatch(&summary)
            .await;
    } else {
        tracing::info!("all {} targets reachable", summary.targets_total);
    }

    let status = if ok {
        HealthStatus::Completed
    } else {
        HealthStatus::Failed
    };
    if let Err(e) = health.write(status) {
        tracing::warn!("could not write health file: {e}");
    }

    Ok(ok)
}
