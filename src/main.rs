use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ride_dispatch::config::{AppConfig, StoreBackend};
use ride_dispatch::db::{self, Gateway, MemoryGateway, PgGateway};
use ride_dispatch::engine::RideServices;
use ride_dispatch::http::{build_router, AppState};
use ride_dispatch::jobs;
use ride_dispatch::notify::{BroadcastBridge, Fanout};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    init_tracing(&config.log_level, config.log_json);

    info!("Starting ride dispatch service...");

    match config.store_backend {
        StoreBackend::Postgres => {
            let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
            info!("Connected to database");
            if config.run_migrations {
                db::run_migrations(&pool).await?;
                info!("Migrations applied");
            }
            run(&config, PgGateway::new(pool)).await
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; nothing survives a restart");
            run(&config, MemoryGateway::new()).await
        }
    }
}

fn init_tracing(filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(filter);
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn run<G: Gateway>(config: &AppConfig, gateway: G) -> anyhow::Result<()> {
    let events = BroadcastBridge::default();
    let notifier = Fanout::new().with(Arc::new(events.clone()));
    let notifier = with_kafka(config, notifier)?;

    let services = RideServices::new(
        gateway.clone(),
        config.dispatch_settings(),
        config.fare_policy(),
        Arc::new(notifier),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = jobs::spawn_expiry_sweep(services.clone(), config.sweep_interval(), shutdown_rx.clone());
    let reset = jobs::spawn_daily_reset(services.clone(), shutdown_rx);

    let app = build_router(AppState { services, events });
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(sweep, reset);
    gateway.close().await;
    info!("Shutdown complete");
    Ok(())
}

#[cfg(feature = "kafka")]
fn with_kafka(config: &AppConfig, notifier: Fanout) -> anyhow::Result<Fanout> {
    use ride_dispatch::notify::kafka::KafkaBridge;

    if !config.kafka.enabled {
        return Ok(notifier);
    }
    let bridge = KafkaBridge::connect(&config.kafka)?;
    Ok(notifier.with(Arc::new(bridge)))
}

#[cfg(not(feature = "kafka"))]
fn with_kafka(config: &AppConfig, notifier: Fanout) -> anyhow::Result<Fanout> {
    if config.kafka.enabled {
        warn!("KAFKA_ENABLED is set but this build has no kafka feature; events stay in-process");
    }
    Ok(notifier)
}
