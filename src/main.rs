use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use opentelemetry::trace::TracerProvider as _;
use tracing::{error, info};

use franz::config::Config;
use franz::telemetry::{self, OtelEmitter, TraceEmitter};
use franz::{handlers, AppState, DeliveryMode, PgStore, ProducerConfig, Server, Service};

const SERVICE_NAME: &str = "franz-api";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    telemetry::init_logging(config.log_format);

    let provider = if config.otel {
        let provider = telemetry::init_tracer_provider(SERVICE_NAME, &config.otel_endpoint)
            .context("failed to initialize tracer provider")?;
        info!(endpoint = %config.otel_endpoint, "exporting traces");
        Some(provider)
    } else {
        None
    };
    let emitter: Option<Arc<dyn TraceEmitter>> = provider
        .as_ref()
        .map(|p| Arc::new(OtelEmitter::new(p.tracer(SERVICE_NAME))) as Arc<dyn TraceEmitter>);

    let mut producer_config = ProducerConfig::parse(&config.kafka_connection)?
        .with_mode(DeliveryMode::from(config.delivery_mode));
    if let Some(emitter) = &emitter {
        producer_config = producer_config.with_emitter(Arc::clone(emitter));
    }
    let producer = producer_config
        .build()
        .await
        .context("failed to create kafka producer")?;

    let store = PgStore::connect(&config.postgres_connection)
        .await
        .context("failed to connect to postgres")?;

    let state = AppState {
        producer: Arc::new(producer),
        store: Arc::new(store),
        emitter: emitter.clone(),
        chat_topic: config.chat_topic.clone(),
    };

    let mut service = Service::new().with_request_timeout(config.request_timeout());
    if let Some(emitter) = &emitter {
        service = service.with_trace_emitter(Arc::clone(emitter));
    }
    handlers::register(&mut service, state.clone())?;
    for route in service.routes() {
        info!(method = %route.method, pattern = %route.pattern, "route registered");
    }

    let served = Server::bind(config.listen_addr()).serve(service).await;

    // Connections are drained by now; nothing else produces.
    if let Err(e) = state.producer.close(config.shutdown_timeout()).await {
        error!(error = %e, "failed to close producer");
    }
    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            error!(error = %e, "failed to shut down tracer provider");
        }
    }

    served.context("server error")?;
    Ok(())
}
