use axum::{routing::get, Router};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use twin_ingestor::config::Config;
use twin_ingestor::db::{self, PostgresStore};
use twin_ingestor::mqtt::{self, MqttSettings};
use twin_ingestor::rest::{self, AppState};
use twin_ingestor::{metrics, IngestPipeline, MemoryStore, QueryService, Store};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting device shadow ingestor");
    info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
    info!("HTTP server: {}", config.http_addr);
    info!(
        "Store: {}",
        config.store_endpoint.split('@').last().unwrap_or("***")
    );
    info!(
        "Watching {} of the reported fields, display offset {}",
        config.schema.watched().len(),
        config.timezone_offset
    );

    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
        std::process::exit(1);
    }

    let (history, calibration) = match open_stores(&config).await {
        Ok(stores) => stores,
        Err(e) => {
            error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    let pipeline = IngestPipeline::new(
        history.clone(),
        calibration.clone(),
        config.schema.clone(),
        config.timezone_offset,
    );
    let queries =
        QueryService::new(history, calibration).with_default_window(config.query_window_secs);

    // Generate client ID
    let settings = MqttSettings {
        broker: config.mqtt_broker.clone(),
        port: config.mqtt_port,
        client_id: format!("twin-ingestor-{}", uuid::Uuid::new_v4()),
        shadow_topic: config.shadow_topic.clone(),
        calibration_topic: config.calibration_topic.clone(),
        store_timeout: config.store_timeout,
    };
    let mqtt_pipeline = pipeline.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt::run_mqtt(settings, mqtt_pipeline).await {
            error!("MQTT task failed: {}", e);
        }
    });

    // Build HTTP app with REST API and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(AppState {
            pipeline,
            queries,
            store_timeout: config.store_timeout,
        }));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

async fn open_stores(config: &Config) -> twin_ingestor::Result<(Arc<dyn Store>, Arc<dyn Store>)> {
    if config.uses_memory_store() {
        info!("Using in-memory store; data is lost on exit");
        return Ok((Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new())));
    }

    let pool = db::make_pool(&config.store_endpoint).await?;
    let history = PostgresStore::open(pool.clone(), config.history_layout()).await?;
    let calibration = PostgresStore::open(pool, config.calibration_layout()).await?;
    Ok((Arc::new(history), Arc::new(calibration)))
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
