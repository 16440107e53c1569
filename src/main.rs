use anyhow::Result;
use price_oracle::{
    app::build_router,
    config::Config,
    handlers::AppState,
    services::*,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting price oracle v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);

    // Initialize services
    let cache = Arc::new(CacheService::new(&config.redis_url).await?);
    if !cache.has_redis() {
        tracing::warn!("Running without redis: replay protection is per-process");
    }
    let chain = Arc::new(EthersChainProvider::new(&config.base_rpc_url, config.rpc_timeout)?);
    let verifier = Arc::new(PaymentVerifier::new(
        chain,
        cache.clone(),
        config.payment.clone(),
    ));

    let breaker = Arc::new(CircuitBreaker::new("zapper", config.circuit_breaker.clone()));
    let price_feed = Arc::new(PriceFeedService::new(config.price_feed.clone(), breaker)?);

    let pipeline = Arc::new(PricePipeline::new(
        cache.clone(),
        verifier,
        price_feed,
        config.pipeline.clone(),
    ));

    let app = build_router(AppState {
        pipeline,
        environment: config.environment.clone(),
        max_body_bytes: config.max_body_bytes,
    });

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight requests have drained
    cache.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutting down gracefully...");
}
