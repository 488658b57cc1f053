use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use sandbox_worker::config::{CliArgs, Config};
use sandbox_worker::publisher::{ResultSink, SpoolResponseChannel};
use sandbox_worker::queue::SpoolJobSource;
use sandbox_worker::sandbox::create_sandbox_runner;
use sandbox_worker::storage::{ArtifactFetcher, LocalArtifactStore};
use sandbox_worker::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config()?;
    let scratch_root = config.scratch_root()?;

    let Config {
        queue: queue_config,
        storage: storage_config,
        sandbox: sandbox_config,
        ..
    } = config;

    log::info!(
        "Worker {} polling {}, publishing to {}, scratch in {}",
        cli.worker_id,
        queue_config.request_queue,
        queue_config.response_queue,
        scratch_root.display()
    );

    let source = Arc::new(SpoolJobSource::new(
        &queue_config.request_queue,
        Duration::from_secs(queue_config.visibility_timeout_secs),
    ));
    let store = Arc::new(LocalArtifactStore::new(storage_config.bucket));
    let fetcher = Arc::new(ArtifactFetcher::new(store, scratch_root));
    let sandbox = Arc::from(create_sandbox_runner(sandbox_config));
    let sink = ResultSink::new(Arc::new(SpoolResponseChannel::new()));

    let worker = Worker::new(
        cli.worker_id,
        source,
        fetcher,
        sandbox,
        sink,
        queue_config.response_queue,
        Duration::from_secs(queue_config.wait_time_secs),
    );
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let worker_token = shutdown_token.clone();
    let mut worker_task = tokio::spawn(async move { worker.run(worker_token).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_worker = &mut worker_task => {
            log::error!("Worker terminated unexpectedly: {:?}", res_worker);
            anyhow::bail!("worker stopped");
        }
    }

    // The worker finishes its current job before observing the token
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to worker, waiting for it to finish...");

    match worker_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Worker finished with error: {e:#}"),
        Err(e) if e.is_panic() => log::error!("Worker handle panicked: {:?}", e),
        Err(e) => log::error!("Worker handle finished with error: {:?}", e),
    }

    log::info!("Shutdown complete");
    Ok(())
}
