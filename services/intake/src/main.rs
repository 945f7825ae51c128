use anyhow::{Context, Result};
use intake_service::api::{start_api_server, AppState};
use intake_service::config::Config;
use intake_service::metadata::{ContainerMetadataExtractor, MetadataExtractor};
use intake_service::pipeline::{IntakePipeline, ProcessingSettings};
use intake_service::policy::ValidationPolicy;
use intake_service::sqs_consumer::SqsConsumer;
use intake_service::storage::build_fetcher;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Invalid configuration aborts before any record is touched
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Repform Intake Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let fetcher = build_fetcher(
        &config.storage,
        config.download_dir(),
        config.max_video_size_bytes(),
    )
    .await
    .context("Failed to initialize object fetcher")?;

    let extractor = build_extractor().context("Failed to initialize metadata extractor")?;
    let policy = Arc::new(ValidationPolicy::new(&config.validation));

    let pipeline = Arc::new(IntakePipeline::new(
        fetcher,
        extractor,
        policy,
        ProcessingSettings::from(&config),
    ));

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    // Spawn SQS consumer task
    if config.sqs.enabled {
        let consumer = SqsConsumer::new(&config.sqs, &config.storage, pipeline.clone())
            .await
            .context("Failed to initialize SQS consumer")?;
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = consumer.run(token).await {
                error!(error = %e, "SQS consumer error");
            }
        }));
    }

    // Spawn API server task
    if config.api.enabled {
        let api_state = AppState {
            pipeline: pipeline.clone(),
        };
        let api_config = config.api.clone();
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = start_api_server(api_state, &api_config, token).await {
                error!(error = %e, "API server error");
            }
        }));
    }

    info!("Intake service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down intake service");

    // Let the in-flight batch settle before exiting
    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Task terminated abnormally");
        }
    }

    info!("Intake service stopped");

    Ok(())
}

#[cfg(not(feature = "gstreamer"))]
fn build_extractor() -> Result<Arc<dyn MetadataExtractor>> {
    Ok(Arc::new(ContainerMetadataExtractor::new()))
}

#[cfg(feature = "gstreamer")]
fn build_extractor() -> Result<Arc<dyn MetadataExtractor>> {
    use intake_service::metadata::frame_probe::GstFrameProbe;

    let probe = GstFrameProbe::new(std::time::Duration::from_secs(10))?;
    Ok(Arc::new(ContainerMetadataExtractor::with_probe(probe)))
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
