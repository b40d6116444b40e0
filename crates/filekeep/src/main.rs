mod config;

use std::sync::Arc;

use clap::Parser;
use filekeep_core::{CancelToken, JsonCodec, SharedSink, TracingSink};
use filekeep_local::{
    AutoSaveScheduler, BackupManager, CrashRecovery, FileManager, FileRegistry, FileStore,
    TickOutcome, Trigger,
};
use filekeep_remote::{GitHubClient, RemotePoller, RemoteSync};
use serde_json::Value;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let data_dir = config.data_dir();

    info!("Starting filekeep");
    info!("  Data dir: {}", data_dir.display());
    info!("  Files: {}", config.files.len());
    info!("  Auto-save interval: {:?}", config.auto_save_interval());
    match config.backup_interval() {
        Some(interval) => info!("  Backup interval: {:?}", interval),
        None => info!("  Scheduled backups disabled"),
    }

    let store = FileStore::new();
    let sink: SharedSink = Arc::new(TracingSink);
    let registry = Arc::new(FileRegistry::new());
    let backup_options = config.backup_options();
    let cancel = CancelToken::none();

    let mut managers = Vec::with_capacity(config.files.len());
    for path in &config.files {
        let backups = BackupManager::new(backup_options.clone(), store.clone());
        let mut manager = FileManager::new(
            path.clone(),
            Arc::new(JsonCodec::<Value>::new()),
            store.clone(),
            backups,
            sink.clone(),
        );
        if let Some(remote) = config.remote_config_for(path) {
            info!("  Remote for {}: {}", path.display(), remote.display_address());
            manager = manager.with_remote(remote);
        }
        let manager = Arc::new(manager);
        registry.register(manager.clone());
        managers.push(manager);
    }

    // Recovery runs before the first load; restored files are loaded by it.
    let recovery = CrashRecovery::new(&data_dir).with_sink(sink.clone());
    let report = recovery.start(&registry, &cancel).await?;
    if report.crash_detected {
        warn!(
            "Previous run did not shut down cleanly: {} restored, {} without backup, {} failed",
            report.restored.len(),
            report.skipped.len(),
            report.failed.len()
        );
    }

    let mut triggers = Vec::new();
    for manager in &managers {
        if !manager.is_loaded() {
            if let Err(e) = manager
                .load_or_init(Value::Object(Default::default()), &cancel)
                .await
            {
                warn!("Not managing {}: {}", manager.path().display(), e);
                registry.unregister(manager.path());
                continue;
            }
        }
        if let Some(interval) = config.backup_interval() {
            let trigger = Trigger::interval(interval);
            manager.attach_trigger(&trigger);
            triggers.push(trigger);
        }
    }
    info!("Managing {} file(s)", registry.len());

    let scheduler = AutoSaveScheduler::new(registry.clone(), sink.clone());
    scheduler.start(config.auto_save_interval());

    let sync = Arc::new(RemoteSync::new(Arc::new(GitHubClient::new()), sink.clone()));
    let poller = RemotePoller::new(sync);
    let polling = poller.watch_all(&registry);
    if polling > 0 {
        info!("Polling {} remote file(s)", polling);
    }

    wait_for_shutdown().await?;

    poller.stop().await;
    for trigger in &triggers {
        trigger.dispose();
    }
    scheduler.stop();

    // Flush edits made since the last tick.
    if let TickOutcome::Completed(summary) = scheduler.execute_now().await {
        for (path, message) in &summary.failed {
            warn!("Final save of {} failed: {}", path.display(), message);
        }
    }

    recovery.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C, or on SIGTERM where the platform has it.
async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            received = signal::ctrl_c() => {
                received?;
                info!("Ctrl+C received, stopping");
            }
            _ = sigterm.recv() => info!("SIGTERM received, stopping"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Ctrl+C received, stopping");
    }

    Ok(())
}
