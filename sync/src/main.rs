//! shopfront-reconcile - run order/product reconciliation over a dataset export.
//!
//! Usage: `shopfront-reconcile <verify|migrate|cleanup> --data export.json [--confirm]`
//!
//! `--data` and `--confirm` fall back to `SHOPFRONT_DATA` and `RECONCILE_CONFIRM`.
//!
//! The export is loaded into an in-memory store, the mode runs against it and,
//! for modes that write, the resulting dataset replaces the export.

use clap::Parser;
use shopfront_engine::DatasetSnapshot;
use shopfront_sync::remote::MemoryStore;
use shopfront_sync::{CleanupConfirmation, ReconciliationEngine, RunOptions, SyncConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shopfront_sync=info,shopfront_reconcile=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = SyncConfig::from_env()?;
    let options = RunOptions::parse();

    if let Err(e) = run(&config, &options).await {
        tracing::error!(mode = %options.mode(), error = %e, "reconciliation failed");
        return Err(e);
    }
    Ok(())
}

async fn run(config: &SyncConfig, options: &RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let run_id = uuid::Uuid::new_v4();
    tracing::info!(
        run_id = %run_id,
        mode = %options.mode(),
        data = %options.data_path.display(),
        "starting reconciliation"
    );

    let raw = tokio::fs::read_to_string(&options.data_path).await?;
    let snapshot = DatasetSnapshot::from_json(&raw)?;
    tracing::info!(documents = snapshot.document_count(), "dataset loaded");

    let store = Arc::new(MemoryStore::from_snapshot(&snapshot));
    let engine = ReconciliationEngine::new(store.clone(), config.reconcile_concurrency);

    let confirmation = options.confirmed.then(CleanupConfirmation::confirm);
    let report = engine.run(options.mode(), confirmation).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    tracing::info!(run_id = %run_id, "{report}");

    if report.writes > 0 {
        let updated = store.export_snapshot().await;
        tokio::fs::write(&options.data_path, updated.to_json_pretty()?).await?;
        tracing::info!(
            run_id = %run_id,
            writes = report.writes,
            documents = updated.document_count(),
            "dataset written back"
        );
    }
    Ok(())
}
