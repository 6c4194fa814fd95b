use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use floorplan_pipeline::app_state::AppState;
use floorplan_pipeline::config::AppConfig;
use floorplan_pipeline::queue::{InMemoryBroker, QueueService};
use floorplan_pipeline::routes;
use floorplan_pipeline::services::{
    BlobObjectDetector, ContrastPreprocessor, FloorPlanTextParser, GeometryRoomDetector,
    MemoryCache, RedisCache, ResultCache, WorkersAiOcrEngine,
};
use floorplan_pipeline::workers::{
    OcrWorker, VisionWorker, WorkerPool, OCR_QUEUE, VISION_QUEUE,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing floorplan-pipeline");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_queue_metrics();

    let queue = Arc::new(QueueService::new(
        Arc::new(InMemoryBroker::new()),
        config.queue_config(),
    ));
    for name in [OCR_QUEUE, VISION_QUEUE] {
        queue
            .register_queue(name)
            .await
            .expect("Failed to register queue");
    }

    let cache: Arc<dyn ResultCache> = match &config.redis_url {
        Some(url) => {
            tracing::info!("Connecting to Redis result cache");
            let cache = RedisCache::new(url, "floorplan").expect("Failed to initialize Redis cache");
            if let Err(e) = cache.health_check().await {
                tracing::warn!(error = %e, "Redis cache not reachable yet");
            }
            Arc::new(cache)
        }
        None => {
            tracing::info!("REDIS_URL not set, using in-memory result cache");
            Arc::new(MemoryCache::new())
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    match (&config.cf_account_id, &config.cf_api_token) {
        (Some(account_id), Some(api_token)) => {
            tracing::info!("Starting OCR worker pool with Cloudflare Workers AI");
            let worker = OcrWorker::new(
                Arc::new(WorkersAiOcrEngine::new(account_id.clone(), api_token.clone())),
                Arc::new(ContrastPreprocessor),
                Arc::new(FloorPlanTextParser::default()),
                cache,
                config.ocr_worker_config(),
            );
            let pool = WorkerPool::new(queue.clone(), Arc::new(worker), config.ocr_pool_config());
            tasks.push(pool.spawn(shutdown_rx.clone()));
        }
        _ => {
            tracing::warn!(
                queue = OCR_QUEUE,
                "CF_ACCOUNT_ID/CF_API_TOKEN not set, OCR jobs will wait until a worker with credentials runs"
            );
        }
    }

    tracing::info!("Starting vision worker pool");
    let vision = VisionWorker::new(
        Arc::new(GeometryRoomDetector),
        Arc::new(BlobObjectDetector::new()),
        config.vision_worker_config(),
    );
    let pool = WorkerPool::new(queue.clone(), Arc::new(vision), config.vision_pool_config());
    tasks.push(pool.spawn(shutdown_rx.clone()));

    tasks.push(
        queue
            .clone()
            .spawn_maintenance(config.maintenance_interval(), shutdown_rx.clone()),
    );

    let body_limit = usize::try_from(config.max_image_bytes)
        .unwrap_or(usize::MAX)
        .saturating_mul(2);

    let app = routes::router(AppState::new(queue))
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(body_limit));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
        .expect("Server error");

    tracing::info!("Shutting down workers");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background task ended abnormally");
        }
    }
}
