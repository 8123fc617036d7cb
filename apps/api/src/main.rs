use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{
    AppointmentRepository, BookingRules, InMemoryAppointmentRepository, SlotBookingCoordinator,
    SupabaseAppointmentRepository,
};
use event_bus_cell::{
    handler_fn, EventEnvelope, EventPublisher, HandlerError, RedisStreamEventBus, RetryingPublisher,
};
use shared_config::AppConfig;
use shared_database::{connect_redis_pool, SupabaseClient};
use slot_lock_cell::{DistributedLockManager, RedisLockStore};

const AUDIT_CONSUMER_GROUP: &str = "appointment-audit-log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting slot booking API server");

    let config = AppConfig::from_env();

    // Process-scoped handles: opened here, closed after the server stops.
    let redis_pool = connect_redis_pool(&config)
        .await
        .with_context(|| format!("connecting to Redis at {}", config.redis_url()))?;

    let locks = DistributedLockManager::new(Arc::new(RedisLockStore::new(redis_pool.clone())));

    let stream_bus: Arc<dyn EventPublisher> = Arc::new(RedisStreamEventBus::new(
        redis_pool.clone(),
        config.event_stream_max_len,
    ));
    let publisher: Arc<dyn EventPublisher> = Arc::new(RetryingPublisher::new(
        stream_bus,
        config.event_publish_max_attempts,
    ));

    let repository: Arc<dyn AppointmentRepository> = if config.is_persistence_configured() {
        info!("Using Supabase appointment repository at {}", config.supabase_url);
        Arc::new(SupabaseAppointmentRepository::new(Arc::new(SupabaseClient::new(&config))))
    } else {
        warn!("Appointments are kept in memory and lost on restart");
        Arc::new(InMemoryAppointmentRepository::new())
    };

    let coordinator = Arc::new(SlotBookingCoordinator::new(
        locks,
        repository,
        publisher.clone(),
        BookingRules::from_config(&config),
        config.appointment_events_topic.clone(),
    ));

    let audit = publisher
        .subscribe(
            &config.appointment_events_topic,
            AUDIT_CONSUMER_GROUP,
            handler_fn(|event: EventEnvelope| async move {
                info!(
                    target: "audit",
                    "{} appointment={} logical={}",
                    event.event_type, event.key, event.emitted_at_logical
                );
                Ok::<(), HandlerError>(())
            }),
        )
        .await
        .context("subscribing audit log consumer")?;

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(coordinator)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("Server stopped, closing connections");
    audit.close().await;
    redis_pool.close();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
