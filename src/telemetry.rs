//! Logging setup and the trace emitter capability.
//!
//! Tracing is injected, never global: the binary builds one
//! [`OtelEmitter`] and passes it to the producer factory, the service and the
//! handlers that start spans. Components without an emitter run untraced.

use std::borrow::Cow;

use http::HeaderMap;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{Error, Result};

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs the process-wide `tracing` subscriber. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Builds an OTLP/HTTP exporting tracer provider for `service_name`.
///
/// The provider is returned rather than installed globally; shut it down at
/// process exit to flush buffered spans.
pub fn init_tracer_provider(service_name: &str, endpoint: &str) -> Result<SdkTracerProvider> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::Resource;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| Error::Telemetry(e.to_string()))?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_owned())
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

// ── Capability ───────────────────────────────────────────────────────────────

/// Starts spans and serialises trace context into carriers.
pub trait TraceEmitter: Send + Sync + 'static {
    /// Starts a span named `name` as a child of `parent`.
    fn start_span(
        &self,
        parent: &Context,
        name: Cow<'static, str>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> ActiveSpan;

    /// Writes the trace context of `cx` into `carrier`.
    fn inject(&self, cx: &Context, carrier: &mut dyn Injector);

    /// Reads a remote parent context from inbound HTTP headers.
    fn extract(&self, headers: &HeaderMap) -> Context;
}

/// A started span. Ended when dropped.
pub struct ActiveSpan {
    cx: Context,
}

impl ActiveSpan {
    pub fn new(cx: Context) -> Self {
        Self { cx }
    }

    /// The context carrying this span, to pass to children.
    pub fn context(&self) -> &Context { &self.cx }

    pub fn record_error(&self, message: impl Into<Cow<'static, str>>) {
        self.cx.span().set_status(Status::error(message));
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        self.cx.span().end();
    }
}

/// [`TraceEmitter`] over an OpenTelemetry tracer with W3C trace-context
/// propagation.
pub struct OtelEmitter<T> {
    tracer: T,
    propagator: TraceContextPropagator,
}

impl<T> OtelEmitter<T>
where
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    pub fn new(tracer: T) -> Self {
        Self { tracer, propagator: TraceContextPropagator::new() }
    }
}

impl<T> TraceEmitter for OtelEmitter<T>
where
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    fn start_span(
        &self,
        parent: &Context,
        name: Cow<'static, str>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> ActiveSpan {
        let span = self.tracer
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(&self.tracer, parent);
        ActiveSpan::new(parent.with_span(span))
    }

    fn inject(&self, cx: &Context, carrier: &mut dyn Injector) {
        self.propagator.inject_context(cx, carrier);
    }

    fn extract(&self, headers: &HeaderMap) -> Context {
        self.propagator.extract(&HeaderExtractor(headers))
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}
