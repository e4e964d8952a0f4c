//! Traceloom Server - Main Entry Point
//!
//! OTLP trace ingestion and stats-propagation backend.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use traceloom_server::api;
use traceloom_server::config::Config;
use traceloom_server::db::{self, MetaStore};
use traceloom_server::ingest;
use traceloom_server::pricing::PricingTable;
use traceloom_server::ratelimit::{AdmissionController, CounterStore, RedisCounterStore};
use traceloom_server::store::EsSpanStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "traceloom_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Traceloom Server"
    );

    // Initialize metadata store
    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;
    let meta: Arc<dyn MetaStore> = Arc::new(db::PgMetaStore::new(db_pool));

    // Initialize counter store (optional - admission is disabled without it)
    let counter: Option<Arc<dyn CounterStore>> = match &config.redis_url {
        Some(url) => match connect_counter_store(url, &config.ratelimit_key_prefix).await {
            Ok(store) => {
                info!("Counter store connected, admission control enabled");
                Some(Arc::new(store))
            }
            Err(e) => {
                warn!("Counter store initialization failed: {e}. Admission control disabled.");
                None
            }
        },
        None => {
            info!("REDIS_URL not set, admission control disabled");
            None
        }
    };

    // Initialize span store
    let span_store = EsSpanStore::new(&config.elasticsearch_url, &config.es_index_prefix)?;
    match span_store.health_check().await {
        Ok(()) => {
            info!(url = %config.elasticsearch_url, "Span store connected");
            if let Err(e) = span_store.ensure_index_template().await {
                warn!("Failed to install span index template: {e}");
            }
        }
        Err(e) => {
            warn!("Span store health check failed: {e}. Ingest will return 503 until it recovers.");
        }
    }

    // Load pricing table (read-only after this point)
    let pricing = PricingTable::load(config.pricing_table_path.as_deref())?;

    // Build application state
    let admission = AdmissionController::new(counter, Arc::clone(&meta));
    let state = api::AppState::new(
        config.clone(),
        meta,
        Arc::new(span_store),
        admission,
        pricing,
    );

    // Start gRPC collector
    let grpc_addr: SocketAddr = config.grpc_bind_address.parse()?;
    let grpc_service = ingest::grpc::service(state.clone());
    tokio::spawn(async move {
        if let Err(e) = tonic::transport::Server::builder()
            .add_service(grpc_service)
            .serve(grpc_addr)
            .await
        {
            error!("gRPC server error: {e}");
        }
    });
    info!(address = %config.grpc_bind_address, "gRPC collector listening");

    // Build router and start HTTP server
    let app = api::create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutdown complete");

    Ok(())
}

async fn connect_counter_store(url: &str, key_prefix: &str) -> Result<RedisCounterStore> {
    let client = db::create_redis_client(url).await?;
    let mut store = RedisCounterStore::new(client, key_prefix);
    store.init().await?;
    Ok(store)
}
