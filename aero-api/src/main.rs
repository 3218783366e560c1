use std::net::SocketAddr;
use std::sync::Arc;

use aero_api::{app, worker, AppState};
use aero_catalog::{FlightCatalog, InventoryLedger};
use aero_core::repository::{FlightRepository, ReservationRepository};
use aero_order::{ExpiryScheduler, HoldPolicy, MockPaymentAdapter, ReservationManager};
use aero_store::app_config::Config;
use aero_store::{
    DbClient, InMemoryFlightRepository, InMemoryReservationRepository, PostgresFlightRepository,
    PostgresReservationRepository,
};
use anyhow::{anyhow, Context};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aero_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Aero API on port {}", config.server.port);

    let (flight_repo, reservation_repo) = repositories(&config).await?;

    let catalog = Arc::new(FlightCatalog::new());
    let ledger = Arc::new(InventoryLedger::new(catalog.clone()));
    let policy = HoldPolicy {
        default_ttl: config.holds.default_ttl(),
        max_ttl: config.holds.max_ttl(),
    };
    let manager = Arc::new(ReservationManager::new(catalog, ledger, policy));

    let app_state = AppState::new(
        manager.clone(),
        Arc::new(MockPaymentAdapter),
        flight_repo,
        reservation_repo.clone(),
    );
    app_state.bootstrap().await?;

    let persistence = worker::start_persistence_worker(&manager, reservation_repo);
    let (expiry, stop_expiry) = ExpiryScheduler::new(manager.clone(), config.holds.sweep_interval()).spawn();

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down background tasks");
    let _ = stop_expiry.send(true);
    expiry.await?;
    // Last handle: the worker drains the channels and exits
    drop(manager);
    if tokio::time::timeout(std::time::Duration::from_secs(5), persistence).await.is_err() {
        tracing::warn!("Persistence worker did not drain in time");
    }

    Ok(())
}

async fn repositories(
    config: &Config,
) -> anyhow::Result<(Arc<dyn FlightRepository>, Arc<dyn ReservationRepository>)> {
    match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;

            Ok((
                Arc::new(PostgresFlightRepository::new(db.pool.clone())),
                Arc::new(PostgresReservationRepository::new(db.pool.clone())),
            ))
        }
        None => {
            tracing::warn!("No database configured, state is kept in memory only");
            let flights = match &config.catalog.seed_file {
                Some(path) => InMemoryFlightRepository::from_json_file(path)
                    .map_err(|e| anyhow!("Failed to read catalog feed {}: {}", path, e))?,
                None => InMemoryFlightRepository::new(),
            };

            Ok((Arc::new(flights), Arc::new(InMemoryReservationRepository::new())))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
