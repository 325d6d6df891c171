use anyhow::Result;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use runwatch_server::app;
use runwatch_server::cleanup::CleanupTask;
use runwatch_server::config::ServerConfig;
use runwatch_server::logging;
use runwatch_server::poller::{AlertDeliveryPoller, TickOutcome};
use runwatch_server::seed;
use runwatch_server::state::{AlertCore, AppState};

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  runwatch-server [config.toml]                                Start the server");
    eprintln!("  runwatch-server tick-once <config.toml>                      Run a single delivery tick and exit");
    eprintln!("  runwatch-server init-definitions <config.toml> <seed.json>   Add alert definitions from a seed file");
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing()?;

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("tick-once") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("tick-once requires a <config.toml> argument")
            })?;
            run_tick_once(config_path).await
        }
        Some("init-definitions") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-definitions requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-definitions requires <seed.json> argument")
            })?;
            run_init_definitions(config_path, seed_path)
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

/// Loads the config and seeds the id generator with this worker's pair.
fn load_config(config_path: &str) -> Result<ServerConfig> {
    let config = ServerConfig::load(config_path)?;
    let (machine_id, node_id) = config.snowflake_ids()?;
    runwatch_common::id::init(machine_id, node_id);
    tracing::debug!(machine_id, node_id, worker_id = %config.worker_id(), "Id generator initialized");
    Ok(config)
}

fn run_init_definitions(config_path: &str, seed_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let core = AlertCore::open(&config)?;
    let seed_file = seed::load_seed_file(seed_path)?;
    let report = seed::apply_definition_seed(&core.definitions, &seed_file);
    if report.failed > 0 {
        anyhow::bail!("{} seeded definitions could not be stored", report.failed);
    }
    Ok(())
}

async fn run_tick_once(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let core = AlertCore::open(&config)?;
    let poller = AlertDeliveryPoller::from_config(core.store.clone(), &config)?;
    match poller.tick_at(Utc::now()).await? {
        TickOutcome::Committed(_) => Ok(()),
        TickOutcome::LeaseHeld => {
            tracing::warn!("Another worker holds the poller lease; nothing done");
            Ok(())
        }
        TickOutcome::TimedOut => anyhow::bail!("delivery tick timed out"),
    }
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;

    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.data_dir,
        database_file = %config.database_file,
        "runwatch-server starting"
    );

    let core = AlertCore::open(&config)?;

    // Durable store wins over whatever was live before a restart.
    match core.client.reconcile_all() {
        Ok(report) => tracing::info!(written = report.written.len(), "Startup reconciliation finished"),
        Err(e) => tracing::error!(error = %e, "Startup reconciliation failed"),
    }

    let client = core.client.clone();
    let events = core.definitions.subscribe();
    let client_handle = tokio::spawn(async move {
        client.run(events).await;
    });

    let poller_handle = if config.poller.enabled {
        let poller = Arc::new(AlertDeliveryPoller::from_config(core.store.clone(), &config)?);
        Some(tokio::spawn(async move {
            poller.run().await;
        }))
    } else {
        tracing::info!("Alert delivery poller disabled");
        None
    };

    let cleanup_handle = if config.cleanup.enabled {
        let task = CleanupTask::new(core.store.clone(), &config.cleanup);
        Some(tokio::spawn(async move {
            task.run().await;
        }))
    } else {
        tracing::info!("Cleanup task disabled");
        None
    };

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let state = AppState::new(core, config);
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let http_server = axum::serve(http_listener, app::build_http_app(state));

    tracing::info!(http = %http_addr, "Server started");

    tokio::select! {
        result = http_server.with_graceful_shutdown(async { signal::ctrl_c().await.ok(); }) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    client_handle.abort();
    if let Some(h) = poller_handle {
        h.abort();
    }
    if let Some(h) = cleanup_handle {
        h.abort();
    }
    tracing::info!("Server stopped");

    Ok(())
}
