//! Sluice admission scheduler binary.
//!
//! Wires the in-memory store, the cluster-queue cache, the queue manager,
//! the store-event sync, and the scheduling loop.

use std::sync::Arc;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sluice_api::{MemoryStore, WorkloadStore};
use sluice_scheduler::{Cache, LogRecorder, QueueManager, Scheduler, SchedulerConfig, StateSync};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("sluice_scheduler=info".parse()?),
        )
        .init();

    info!("Sluice admission scheduler starting");

    // Load configuration
    let config: SchedulerConfig = Figment::new()
        .merge(Toml::file("sluice.toml"))
        .merge(Env::prefixed("SLUICE_"))
        .extract()?;

    info!(
        manager = %config.manager_name,
        worker_count = config.worker_count,
        "Configuration loaded"
    );

    // A production deployment would back this with the control plane's
    // object storage; the in-memory store serves adapters in-process.
    let store = Arc::new(MemoryStore::new());
    let events = store.watch();

    let cache = Arc::new(Cache::new());
    let queues = Arc::new(QueueManager::new());
    let recorder = Arc::new(LogRecorder::new(config.manager_name.clone()));

    let scheduler = Scheduler::new(
        Arc::clone(&queues),
        Arc::clone(&cache),
        Arc::clone(&store) as Arc<dyn WorkloadStore>,
        recorder,
        config,
    );

    let token = CancellationToken::new();

    let sync = StateSync::new(cache, queues, Arc::clone(&store) as Arc<dyn WorkloadStore>);
    let mut sync_task = tokio::spawn({
        let token = token.clone();
        async move { sync.run(events, token).await }
    });

    let scheduler_task = tokio::spawn({
        let token = token.clone();
        async move { scheduler.run(token).await }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            token.cancel();
            let _ = scheduler_task.await;
            let _ = sync_task.await;
        }
        result = &mut sync_task => {
            match result {
                Ok(Err(error)) => {
                    // Quota accounting is corrupted; abort rather than
                    // keep admitting against bad state.
                    error!(error = %error, "State sync failed");
                    std::process::exit(1);
                }
                Ok(Ok(())) => info!("Watch channel closed"),
                Err(error) => error!(error = %error, "State sync task failed"),
            }
            token.cancel();
            let _ = scheduler_task.await;
        }
    }

    info!("Sluice admission scheduler stopped");
    Ok(())
}
