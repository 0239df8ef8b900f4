#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use segid::{AllocStore, SegmentAllocator};
use server::config::{CliArgs, ServerConfig};
use server::routes::{AppState, router};
use server::seed::{TagSeed, build_store, open_file_store, read_seed_file};
use server::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry()?;

    let seeds = collect_seeds(&config)?;
    match &config.data_file {
        Some(path) => serve(&config, open_file_store(path, seeds)?).await,
        None => {
            #[cfg(feature = "tracing")]
            tracing::warn!("No DATA_FILE configured, ids restart from the seeds on every start");
            serve(&config, build_store(seeds)).await
        }
    }
}

async fn serve<S: AllocStore>(config: &ServerConfig, store: S) -> anyhow::Result<()> {
    let allocator = SegmentAllocator::with_config(store, config.allocator.clone());
    if !allocator.initialize().await {
        anyhow::bail!("failed to initialize the segment allocator");
    }

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config.server_addr, config, &allocator);

    axum::serve(listener, router(AppState::new(allocator.clone())))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(_e) = allocator.shutdown().await {
        #[cfg(feature = "tracing")]
        tracing::error!("Error during allocator shutdown: {_e}");
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");
    Ok(())
}

/// Seed file rows first, then `--tag` rows, so the command line wins.
fn collect_seeds(config: &ServerConfig) -> anyhow::Result<Vec<TagSeed>> {
    let mut seeds = match &config.seed_file {
        Some(path) => read_seed_file(path)?,
        None => Vec::new(),
    };
    seeds.extend(config.tags.iter().cloned());

    #[cfg(feature = "tracing")]
    if seeds.is_empty() && config.data_file.is_none() {
        tracing::warn!("No tags configured, every request will report KEY_NOT_FOUND");
    }

    Ok(seeds)
}

fn log_startup_info<S: AllocStore>(
    _addr: &str,
    _config: &ServerConfig,
    _allocator: &SegmentAllocator<S>,
) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting ID service on {} with full config: {:#?}",
            _addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting ID service on {} serving {} tags",
            _addr,
            _allocator.tags().len()
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");
}
