//! Saga orchestrator entry point.

use std::sync::Arc;

use api::config::{BrokerKind, Config, LogFormat};
use api::runtime::{self, Services, Shutdown};
use message_bus::{InMemoryBroker, MessageBroker, NatsBroker};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::Orchestrator;
use saga_store::SqliteStore;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Durable saga store and idempotency ledger
    let store = SqliteStore::connect(&config.database_url).await?;
    tracing::info!(url = %config.database_url, "saga store ready");

    // 4. Broker backend
    let result = match config.broker {
        BrokerKind::Memory => {
            tracing::warn!("using the in-memory broker, unprocessed messages are lost on restart");
            run(&config, store.clone(), InMemoryBroker::new(), metrics_handle).await
        }
        BrokerKind::Nats => {
            let broker = NatsBroker::connect(&config.nats_url, &config.nats_stream).await?;
            run(&config, store.clone(), broker, metrics_handle).await
        }
    };

    store.close().await;
    if result.is_ok() {
        tracing::info!("server shut down gracefully");
    }
    result
}

async fn run<B: MessageBroker>(
    config: &Config,
    store: SqliteStore,
    broker: B,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    // 5. Broker topology
    runtime::declare_topology(&broker).await?;

    // 6. Republish commands left behind by an interrupted run
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), store.clone(), broker.clone()));
    let recovered = orchestrator.recover().await?;
    if recovered > 0 {
        tracing::info!(recovered, "pending commands republished");
    }

    // 7. Workers and the orchestrator loop
    let shutdown = Shutdown::new();
    let services = Services::from_config(config);
    let worker_tasks = runtime::spawn_workers(&broker, &services, config, &shutdown).await?;
    let locks = orchestrator.locks().clone();
    let orchestrator_task = runtime::spawn_orchestrator(orchestrator, &broker, &shutdown).await?;

    // 8. HTTP intake
    let state = api::create_state(store, broker, locks);
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting saga orchestrator");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = shutdown_signal() => {}
                () = stop.wait() => {
                    tracing::warn!("background task failed, shutting down");
                }
            }
            stop.trigger();
        })
        .await?;

    // 9. Drain background loops; any failure makes the exit non-zero
    shutdown.trigger();
    let mut failed = false;
    for task in worker_tasks {
        if let Err(e) = task.await? {
            tracing::error!(error = %e, "worker stopped with error");
            failed = true;
        }
    }
    if let Err(e) = orchestrator_task.await? {
        tracing::error!(error = %e, "orchestrator stopped with error");
        failed = true;
    }

    if failed {
        return Err("background processing failed".into());
    }
    Ok(())
}
