use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use parlay::adapters::PostgresStore;
use parlay::config::{AppConfig, ExecutionMode};
use parlay::engine::{build_executor, OrderProcessor};
use parlay::error::Result;
use parlay::queue::{pg::PgJobQueue, worker::WorkerPool};
use parlay::services::{HealthServer, HealthState};
use parlay::signing::{ApiCredentials, HmacAuth};
use parlay::venue::{ClobVenueClient, PaymentClient, RelayerPaymentClient, VenueClient};

#[derive(Parser)]
#[command(name = "parlay", about = "Prediction-market order gateway", version)]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker daemon and health server
    Serve,
    /// Run database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)?;
    let _log_guard = init_logging(&config);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("config: {e}");
        }
        return Err(parlay::error::EngineError::Validation(errors.join("; ")));
    }

    match cli.command {
        Commands::Migrate => {
            let store = PostgresStore::new(&config.database.url, config.database.max_connections)
                .await?;
            store.migrate().await?;
            Ok(())
        }
        Commands::Serve => serve(config).await,
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let store =
        PostgresStore::new(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;

    // Explicit wiring, once, at process start. No hidden registry: every
    // component below is constructed here and passed by handle.
    let pool = store.pool().clone();

    let venue: Option<Arc<dyn VenueClient>> = match (&config.execution.mode, &config.venue) {
        (ExecutionMode::Real, Some(venue_config)) => {
            let auth = HmacAuth::new(ApiCredentials::from_env()?);
            Some(Arc::new(ClobVenueClient::new(venue_config, auth)?))
        }
        _ => None,
    };
    let payment: Option<Arc<dyn PaymentClient>> = match (&config.execution.mode, &config.payment) {
        (ExecutionMode::Real, Some(payment_config)) => {
            Some(Arc::new(RelayerPaymentClient::new(payment_config)?))
        }
        _ => None,
    };

    let executor = build_executor(
        &config.execution,
        venue,
        payment,
        config.venue.as_ref().and_then(|v| v.min_order_value),
    )?;

    let queue = Arc::new(PgJobQueue::new(pool.clone(), config.queue.clone()));
    let processor = Arc::new(OrderProcessor::new(store.clone(), executor));

    let workers = WorkerPool::new(queue, processor, config.queue.clone());
    let worker_handles = workers.start();

    let health_state = Arc::new(HealthState::new());
    health_state.set_workers_running(true);
    if let Some(port) = config.health_port {
        let state = health_state.clone();
        let health_pool = pool.clone();
        tokio::spawn(async move {
            if let Err(e) = HealthServer::serve(port, state, health_pool).await {
                error!("health server exited: {e}");
            }
        });
    }

    info!("parlay worker daemon running; press Ctrl+C to stop");
    shutdown_signal().await;

    info!("shutting down");
    workers.stop();
    health_state.set_workers_running(false);
    for handle in worker_handles {
        let _ = handle.await;
    }

    Ok(())
}

fn init_logging(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},parlay=debug,sqlx=warn", config.logging.level))
    });

    if let Some(dir) = &config.logging.dir {
        let appender = tracing_appender::rolling::daily(dir, "parlay.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true);
        if config.logging.json {
            builder.json().init();
        } else {
            builder.init();
        }
        return Some(guard);
    }

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    None
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
