//! Producer configuration, factory and the traced producer handlers call.
//!
//! # Delivery modes
//!
//! | Mode | Acks | Batching | `produce_message` returns |
//! |---|---|---|---|
//! | [`DeliveryMode::Async`] | partition leader | snappy, flushed every 500 ms | once enqueued |
//! | [`DeliveryMode::Sync`] | all in-sync replicas | none | once acknowledged or retries are exhausted |
//!
//! Asynchronous failures never reach the caller. They flow through an error
//! channel into the [`ErrorDrain`], which logs and counts them.
//!
//! # Lifecycle
//!
//! Build one producer at startup, share it behind an `Arc`, and call
//! [`TracedProducer::close`] once at teardown. After `close` every
//! `produce_message` fails fast with [`Error::Closed`]. Dropping an unclosed
//! producer still stops its background tasks, without flushing the client.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use opentelemetry::KeyValue;
use opentelemetry::trace::SpanKind;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tracing::{debug, info, warn};

use crate::broker::{Broker, Delivery, OutgoingMessage};
use crate::context::RequestContext;
use crate::drain::ErrorDrain;
use crate::error::{DeliveryFailure, Error, Result};
use crate::kafka::KafkaBroker;
use crate::telemetry::{ActiveSpan, TraceEmitter};

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    Sync,
    #[default]
    Async,
}

/// How many replicas must confirm a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acks {
    Leader,
    All,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    None,
    Snappy,
}

/// Delivery guarantees applied by the factory for a [`DeliveryMode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub acks: Acks,
    pub compression: Compression,
    /// Batch flush cadence. `None` sends per message.
    pub flush_interval: Option<Duration>,
    /// Retry ceiling for transient failures.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Capacity of the asynchronous input queue.
    pub queue_capacity: usize,
    /// Acknowledgments the asynchronous pump awaits at once.
    pub max_in_flight: usize,
    /// Longest an asynchronous enqueue waits for queue space.
    pub enqueue_timeout: Duration,
    /// Longest the client tries to deliver one message before reporting failure.
    pub send_timeout: Duration,
}

impl DeliveryPolicy {
    pub fn for_mode(mode: DeliveryMode) -> Self {
        match mode {
            DeliveryMode::Async => Self {
                acks: Acks::Leader,
                compression: Compression::Snappy,
                flush_interval: Some(Duration::from_millis(500)),
                max_retries: 3,
                retry_backoff: Duration::from_millis(100),
                queue_capacity: 1024,
                max_in_flight: 256,
                enqueue_timeout: Duration::from_secs(1),
                send_timeout: Duration::from_secs(5),
            },
            DeliveryMode::Sync => Self {
                acks: Acks::All,
                compression: Compression::None,
                flush_interval: None,
                max_retries: 10,
                retry_backoff: Duration::from_millis(100),
                queue_capacity: 0,
                max_in_flight: 1,
                enqueue_timeout: Duration::ZERO,
                send_timeout: Duration::from_secs(5),
            },
        }
    }
}

/// Broker endpoints, delivery mode and an optional trace emitter.
///
/// Building twice from one configuration yields two independent producers,
/// each with its own broker connection. That works but wastes a connection;
/// build once and share.
#[derive(Clone)]
pub struct ProducerConfig {
    brokers: Vec<String>,
    mode: DeliveryMode,
    emitter: Option<Arc<dyn TraceEmitter>>,
    client_id: String,
    connect_timeout: Duration,
}

impl ProducerConfig {
    /// Fails with [`Error::Connection`] when the list is empty or an
    /// endpoint is not `host:port`.
    pub fn new<I, S>(brokers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let brokers: Vec<String> = brokers.into_iter().map(Into::into).collect();
        if brokers.is_empty() {
            return Err(Error::Connection("no broker endpoints configured".into()));
        }
        for endpoint in &brokers {
            validate_endpoint(endpoint)?;
        }
        Ok(Self {
            brokers,
            mode: DeliveryMode::default(),
            emitter: None,
            client_id: "franz".into(),
            connect_timeout: Duration::from_secs(5),
        })
    }

    /// Parses a comma-separated endpoint list, e.g. `"k1:9094,k2:9094"`.
    pub fn parse(connection: &str) -> Result<Self> {
        Self::new(connection.split(',').map(str::trim).filter(|s| !s.is_empty()))
    }

    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn TraceEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Bound on the reachability probe made while building.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn brokers(&self) -> &[String] { &self.brokers }
    pub fn mode(&self) -> DeliveryMode { self.mode }
    pub fn client_id(&self) -> &str { &self.client_id }
    pub fn connect_timeout(&self) -> Duration { self.connect_timeout }
    pub fn policy(&self) -> DeliveryPolicy { DeliveryPolicy::for_mode(self.mode) }

    /// Connects to Kafka and builds a producer.
    pub async fn build(&self) -> Result<TracedProducer> {
        let broker = KafkaBroker::connect(self).await?;
        Ok(self.build_with(Arc::new(broker)))
    }

    /// Builds a producer over an already connected broker client.
    ///
    /// Must be called inside a tokio runtime in asynchronous mode: it spawns
    /// the send pump and the error drain.
    pub fn build_with(&self, broker: Arc<dyn Broker>) -> TracedProducer {
        TracedProducer::new(broker, self.mode, self.policy(), self.emitter.clone())
    }
}

/// Factory entry point: `build_producer(config) -> TracedProducer`.
pub async fn build_producer(config: &ProducerConfig) -> Result<TracedProducer> {
    config.build().await
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let malformed = || Error::Connection(format!("malformed broker endpoint `{endpoint}`, expected host:port"));
    let (host, port) = endpoint.rsplit_once(':').ok_or_else(malformed)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(malformed());
    }
    Ok(())
}

// ── Traced producer ──────────────────────────────────────────────────────────

/// What `produce_message` achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Produced {
    /// Accepted into the asynchronous queue; not yet on the broker.
    Enqueued,
    /// Acknowledged by the broker.
    Delivered(Delivery),
}

/// Trace decoration, chosen once at build time.
enum Tracing {
    Plain,
    Traced(Arc<dyn TraceEmitter>),
}

impl Tracing {
    /// Starts a producer span and injects it into the message headers.
    fn decorate(&self, cx: &RequestContext, message: &mut OutgoingMessage) -> Option<ActiveSpan> {
        let Self::Traced(emitter) = self else { return None };
        let span = emitter.start_span(
            cx.trace(),
            Cow::Owned(format!("{} publish", message.topic)),
            SpanKind::Producer,
            vec![
                KeyValue::new("messaging.system", "kafka"),
                KeyValue::new("messaging.destination.name", message.topic.clone()),
                KeyValue::new("messaging.operation.type", "send"),
            ],
        );
        emitter.inject(span.context(), &mut message.headers);
        Some(span)
    }
}

/// A message queued for the asynchronous pump, with the span that ends once
/// the broker answers.
struct Pending {
    message: OutgoingMessage,
    span: Option<ActiveSpan>,
}

struct AsyncPipeline {
    input: Mutex<Option<mpsc::Sender<Pending>>>,
    tasks: Mutex<Option<(JoinHandle<()>, ErrorDrain)>>,
}

enum Pipeline {
    Sync,
    Async(AsyncPipeline),
}

/// The producer shared by every handler.
///
/// Owns exactly one broker client. The trace emitter, when present, is
/// shared with the rest of the process.
pub struct TracedProducer {
    broker: Arc<dyn Broker>,
    mode: DeliveryMode,
    policy: DeliveryPolicy,
    tracing: Tracing,
    pipeline: Pipeline,
    closed: AtomicBool,
    failures: Arc<AtomicU64>,
}

impl TracedProducer {
    fn new(
        broker: Arc<dyn Broker>,
        mode: DeliveryMode,
        policy: DeliveryPolicy,
        emitter: Option<Arc<dyn TraceEmitter>>,
    ) -> Self {
        let failures = Arc::new(AtomicU64::new(0));
        let pipeline = match mode {
            DeliveryMode::Sync => Pipeline::Sync,
            DeliveryMode::Async => {
                let (input_tx, input_rx) = mpsc::channel(policy.queue_capacity.max(1));
                let (error_tx, error_rx) = mpsc::unbounded_channel();
                let drain = ErrorDrain::spawn(error_rx, Arc::clone(&failures));
                let pump = tokio::spawn(pump(Arc::clone(&broker), input_rx, error_tx, policy.max_in_flight.max(1)));
                Pipeline::Async(AsyncPipeline {
                    input: Mutex::new(Some(input_tx)),
                    tasks: Mutex::new(Some((pump, drain))),
                })
            }
        };
        let tracing = match emitter {
            Some(emitter) => Tracing::Traced(emitter),
            None => Tracing::Plain,
        };
        Self {
            broker,
            mode,
            policy,
            tracing,
            pipeline,
            closed: AtomicBool::new(false),
            failures,
        }
    }

    pub fn mode(&self) -> DeliveryMode { self.mode }
    pub fn policy(&self) -> &DeliveryPolicy { &self.policy }
    pub fn is_traced(&self) -> bool { matches!(self.tracing, Tracing::Traced(_)) }
    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }

    /// Asynchronous failures reported by the error drain so far.
    pub fn delivery_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Hands `message` to the broker.
    ///
    /// Trace context is injected into the headers before handoff. In
    /// asynchronous mode this returns once the message is queued, waiting at
    /// most the enqueue timeout (or the caller's deadline, if sooner). In
    /// synchronous mode it waits for the acknowledgment, retrying retriable
    /// failures, and returns [`Error::Delivery`] on final failure.
    pub async fn produce_message(&self, cx: &RequestContext, mut message: OutgoingMessage) -> Result<Produced> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        message.validate()?;
        if cx.is_expired() {
            return Err(Error::DeadlineExceeded);
        }

        let span = self.tracing.decorate(cx, &mut message);

        match &self.pipeline {
            Pipeline::Async(pipeline) => self.enqueue(pipeline, cx, Pending { message, span }).await,
            Pipeline::Sync => {
                let result = match cx.deadline() {
                    Some(deadline) => timeout_at(deadline, self.send_with_retries(message))
                        .await
                        .unwrap_or(Err(Error::DeadlineExceeded)),
                    None => self.send_with_retries(message).await,
                };
                if let (Some(span), Err(e)) = (&span, &result) {
                    span.record_error(e.to_string());
                }
                result.map(Produced::Delivered)
            }
        }
    }

    async fn enqueue(&self, pipeline: &AsyncPipeline, cx: &RequestContext, pending: Pending) -> Result<Produced> {
        let sender = pipeline.input
            .lock()
            .map_err(|_| Error::Closed)?
            .clone()
            .ok_or(Error::Closed)?;

        let (wait, deadline_bound) = match cx.remaining() {
            Some(remaining) if remaining < self.policy.enqueue_timeout => (remaining, true),
            _ => (self.policy.enqueue_timeout, false),
        };

        match sender.send_timeout(pending, wait).await {
            Ok(()) => Ok(Produced::Enqueued),
            Err(SendTimeoutError::Closed(_)) => Err(Error::Closed),
            Err(SendTimeoutError::Timeout(_)) if deadline_bound => Err(Error::DeadlineExceeded),
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(wait_ms = wait.as_millis() as u64, "producer queue full");
                Err(Error::QueueFull)
            }
        }
    }

    async fn send_with_retries(&self, message: OutgoingMessage) -> Result<Delivery> {
        let mut attempt = 0;
        loop {
            match self.broker.send(message.clone()).await {
                Ok(delivery) => return Ok(delivery),
                Err(failure) if failure.retriable && attempt < self.policy.max_retries => {
                    attempt += 1;
                    debug!(topic = %failure.topic, reason = %failure.reason, attempt, "retrying send");
                    tokio::time::sleep(self.policy.retry_backoff).await;
                }
                Err(failure) => return Err(Error::Delivery(failure)),
            }
        }
    }

    /// Stops accepting messages, lets queued ones finish, stops the error
    /// drain and flushes the broker client, waiting at most `timeout` for
    /// each step.
    ///
    /// Only the first call does anything; later calls return
    /// [`Error::Closed`].
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }
        info!(mode = ?self.mode, "closing producer");

        if let Pipeline::Async(pipeline) = &self.pipeline {
            // Dropping the only sender ends the pump, which in turn drops the
            // error sender and stops the drain.
            drop(pipeline.input.lock().ok().and_then(|mut input| input.take()));

            let tasks = pipeline.tasks.lock().ok().and_then(|mut tasks| tasks.take());
            if let Some((pump, drain)) = tasks {
                if tokio::time::timeout(timeout, pump).await.is_err() {
                    warn!("producer pump did not finish in time");
                }
                match tokio::time::timeout(timeout, drain.join()).await {
                    Ok(reported) => debug!(reported, "error drain finished"),
                    Err(_) => warn!("error drain did not finish in time"),
                }
            }
        }

        self.broker.close(timeout).await
    }
}

/// Moves queued messages to the broker.
///
/// Messages are handed off one at a time in queue order, so the client sees
/// them in the order callers enqueued them and per-key ordering holds. Up to
/// `max_in_flight` acknowledgments are awaited concurrently; failures go to
/// the error drain in completion order.
async fn pump(
    broker: Arc<dyn Broker>,
    mut input: mpsc::Receiver<Pending>,
    errors: mpsc::UnboundedSender<DeliveryFailure>,
    max_in_flight: usize,
) {
    let mut in_flight = FuturesUnordered::new();
    loop {
        tokio::select! {
            pending = input.recv(), if in_flight.len() < max_in_flight => match pending {
                Some(Pending { message, span }) => {
                    let delivery = broker.enqueue(message);
                    in_flight.push(async move {
                        let result = delivery.await;
                        if let (Some(span), Err(failure)) = (&span, &result) {
                            span.record_error(failure.to_string());
                        }
                        result
                    });
                }
                None => break,
            },
            Some(done) = in_flight.next(), if !in_flight.is_empty() => report(done, &errors),
        }
    }
    while let Some(done) = in_flight.next().await {
        report(done, &errors);
    }
}

fn report(done: std::result::Result<Delivery, DeliveryFailure>, errors: &mpsc::UnboundedSender<DeliveryFailure>) {
    if let Err(failure) = done {
        // The drain only stops after this sender is dropped, so this cannot
        // fail unless the drain panicked.
        let _ = errors.send(failure);
    }
}
