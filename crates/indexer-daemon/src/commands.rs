//! Command implementations for the indexer daemon.
//!
//! `start`:
//! 1. Load configuration and apply CLI overrides
//! 2. Open the event store, search index and type rules
//! 3. Start the coordinator and worker loops on a shared cancellation token
//! 4. Stop every loop on SIGINT/SIGTERM and wait for them to exit

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use indexer_adapters::LocalDirectoryHandler;
use indexer_pipeline::{
    CoordinatorConfig, HandlerRegistry, IndexerCoordinator, IndexerWorker, IndexingError,
    LoopHandle, WorkerConfig, WorkerServices,
};
use indexer_rules::load_type_rules_dir;
use indexer_search::{SearchIndexConfig, TantivySearchStorage};
use indexer_storage::{RocksEventStorage, StorageStats};
use indexer_types::Settings;

use crate::cli::StartArgs;

/// Apply `start` flags on top of loaded settings.
pub fn apply_start_overrides(
    settings: &mut Settings,
    args: &StartArgs,
    log_level: Option<&str>,
) -> Result<()> {
    if let Some(db_path) = &args.db_path {
        settings.event_db_path = db_path.clone();
    }
    if let Some(index_path) = &args.index_path {
        settings.search_index_path = index_path.clone();
    }
    if let Some(workers) = args.workers {
        settings.worker.count = workers;
    }
    if let Some(codes) = &args.codes {
        settings.worker.codes = codes.clone();
    }
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    settings.validate().context("Invalid configuration")?;

    if settings.worker.count == 0 && args.no_coordinator {
        bail!("Nothing to run: no workers and the coordinator is disabled");
    }
    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Start the daemon and run until a shutdown signal or until every loop has
/// exited.
pub async fn start_daemon(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    args: StartArgs,
) -> Result<()> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    apply_start_overrides(&mut settings, &args, log_level_override)?;
    init_logging(&settings.log_level)?;

    info!("Indexer daemon starting...");
    info!("Configuration:");
    info!("  Event database: {}", settings.event_db_path);
    info!("  Search index: {}", settings.search_index_path);
    info!("  Type rules: {}", settings.type_rules_dir);
    info!("  Source root: {}", settings.source_root);
    info!("  Log level: {}", settings.log_level);

    let db_path = settings.expanded_event_db_path();
    fs::create_dir_all(&db_path).context("Failed to create event database directory")?;
    let events = Arc::new(RocksEventStorage::open(&db_path).context("Failed to open event store")?);
    log_stats("Event store opened", &events.get_stats()?);

    let index_path = settings.expanded_search_index_path();
    fs::create_dir_all(&index_path).context("Failed to create search index directory")?;
    let search = Arc::new(
        TantivySearchStorage::open(SearchIndexConfig::new(&index_path))
            .context("Failed to open search index")?,
    );

    let type_storage = Arc::new(
        load_type_rules_dir(&settings.expanded_type_rules_dir())
            .context("Failed to load type rules")?,
    );

    let handlers = HandlerRegistry::new().with_handler(Arc::new(LocalDirectoryHandler::new(
        settings.expanded_source_root(),
    )));
    info!(storage_codes = ?handlers.storage_codes(), "Registered source data handlers");

    let services = WorkerServices {
        events: events.clone(),
        handlers,
        type_storage,
        search,
    };

    let cancel = CancellationToken::new();
    let mut handles: Vec<LoopHandle> = Vec::new();
    if args.no_coordinator {
        info!("Coordinator disabled");
    } else {
        let config = CoordinatorConfig::from_settings(&settings.coordinator, &settings.retry);
        handles.push(IndexerCoordinator::start(config, events.clone(), cancel.clone()));
    }
    for i in 0..settings.worker.count {
        let config = WorkerConfig::from_settings(format!("worker-{}", i), &settings);
        match IndexerWorker::start(config, services.clone(), cancel.clone()) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                cancel.cancel();
                wait_for_loops(handles).await;
                return Err(e).context("Failed to start worker");
            }
        }
    }
    info!(
        workers = settings.worker.count,
        codes = ?settings.worker.effective_codes(),
        "Indexer loops running"
    );

    let failed = run_until_shutdown(handles, cancel).await;
    log_stats("Event store at shutdown", &events.get_stats()?);

    if failed > 0 {
        bail!("{} loop(s) stopped on a fatal error", failed);
    }
    info!("Indexer daemon stopped");
    Ok(())
}

/// Wait for a shutdown signal, then cancel every loop and wait for them.
/// A loop stopping on its own does not stop the others. Returns the number
/// of loops that stopped with an error.
async fn run_until_shutdown(handles: Vec<LoopHandle>, cancel: CancellationToken) -> usize {
    let mut joins = spawn_joins(handles);
    let mut failed = 0;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            next = joins.join_next() => match next {
                Some(result) => failed += record_exit(result),
                None => {
                    warn!("All indexer loops have exited");
                    return failed;
                }
            },
        }
    }

    cancel.cancel();
    while let Some(result) = joins.join_next().await {
        failed += record_exit(result);
    }
    failed
}

async fn wait_for_loops(handles: Vec<LoopHandle>) {
    let mut joins = spawn_joins(handles);
    while let Some(result) = joins.join_next().await {
        record_exit(result);
    }
}

type LoopExit = (String, Result<(), IndexingError>);

fn spawn_joins(handles: Vec<LoopHandle>) -> JoinSet<LoopExit> {
    let mut joins = JoinSet::new();
    for handle in handles {
        joins.spawn(async move {
            let name = handle.name().to_string();
            (name, handle.join().await)
        });
    }
    joins
}

fn record_exit(result: Result<LoopExit, tokio::task::JoinError>) -> usize {
    match result {
        Ok((name, Ok(()))) => {
            info!(name = %name, "Loop stopped");
            0
        }
        Ok((name, Err(e))) => {
            error!(name = %name, error = %e, "Loop stopped on error");
            1
        }
        Err(e) => {
            error!(error = %e, "Loop join task failed");
            1
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

fn log_stats(message: &str, stats: &StorageStats) {
    let by_state: Vec<String> = stats
        .by_state
        .iter()
        .map(|(state, count)| format!("{}={}", state, count))
        .collect();
    info!(events = stats.event_count, by_state = %by_state.join(" "), "{}", message);
}

/// Load a type rules directory and print a summary.
pub fn validate_rules(dir: &Path) -> Result<()> {
    let storage = load_type_rules_dir(dir)
        .with_context(|| format!("Invalid type rules in {}", dir.display()))?;
    println!("Type rules OK: {}", dir.display());
    println!("  Search types: {}", storage.search_type_count());
    println!("  Type mappings: {}", storage.mapping_count());
    Ok(())
}
