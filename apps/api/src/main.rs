use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{
    AccountDirectory, AppointmentStore, LogMailer, MemoryStore, NotificationFanout, SchedulingState, SupabaseStore,
};
use notification_cell::{BroadcastHub, NotificationPublisher, RedisPublisher};
use shared_config::{AppConfig, StorageBackend};

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

    info!("Starting clinic scheduling API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    // Storage
    let (store, accounts): (Arc<dyn AppointmentStore>, Arc<dyn AccountDirectory>) =
        match config.storage_backend {
            StorageBackend::Supabase if config.is_supabase_configured() => {
                info!("Using Supabase storage at {}", config.supabase_url);
                let store = Arc::new(SupabaseStore::new(&config));
                (store.clone() as Arc<dyn AppointmentStore>, store as Arc<dyn AccountDirectory>)
            }
            backend => {
                if backend == StorageBackend::Supabase {
                    warn!("Supabase storage requested but not configured, falling back to memory");
                }
                info!("Using in-memory storage");
                let store = Arc::new(MemoryStore::new());
                (store.clone() as Arc<dyn AppointmentStore>, store as Arc<dyn AccountDirectory>)
            }
        };

    // Event delivery
    let publisher: Arc<dyn NotificationPublisher> = match &config.redis_url {
        Some(url) => match RedisPublisher::new(url).await {
            Ok(redis) => {
                info!("Publishing schedule events to Redis");
                Arc::new(redis)
            }
            Err(e) => {
                warn!("Redis unavailable ({}), using in-process broadcast", e);
                Arc::new(BroadcastHub::new())
            }
        },
        None => Arc::new(BroadcastHub::new()),
    };
    let fanout = NotificationFanout::new(publisher, Arc::new(LogMailer), config.notify_admin);

    let state = SchedulingState::new(config.clone(), store, accounts, fanout);

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
