//! # franz
//!
//! A chat front end that relays messages onto Kafka, built on a small
//! composable HTTP dispatch layer.
//!
//! ## The pieces
//!
//! - [`Service`]: one radix tree per method via [`matchit`], per-route
//!   middleware chains, request deadlines, a single point of reply emission.
//! - [`TracedProducer`]: a Kafka producer in sync or async delivery mode,
//!   optionally propagating W3C trace context into message headers.
//! - [`Store`]: the relational capability behind the record-insert routes.
//! - [`Server`]: hyper on tokio, graceful shutdown on SIGTERM / Ctrl-C.
//!
//! Dependencies are passed in explicitly. There are no process-wide
//! singletons besides the log subscriber.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use franz::{handlers, AppState, PgStore, ProducerConfig, Server, Service};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let producer = ProducerConfig::parse("localhost:9094")?.build().await?;
//!     let store = PgStore::connect("postgresql://localhost/franz").await?;
//!
//!     let state = AppState {
//!         producer: Arc::new(producer),
//!         store: Arc::new(store),
//!         emitter: None,
//!         chat_topic: "chat".into(),
//!     };
//!
//!     let mut service = Service::new().with_request_timeout(Duration::from_secs(10));
//!     handlers::register(&mut service, state.clone())?;
//!
//!     Server::bind(([0, 0, 0, 0], 8008).into()).serve(service).await?;
//!     state.producer.close(Duration::from_secs(5)).await?;
//!     Ok(())
//! }
//! ```

mod broker;
mod context;
mod drain;
mod error;
mod handler;
mod kafka;
mod producer;
mod request;
mod response;
mod server;
mod service;
mod store;

pub mod config;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod telemetry;

pub use broker::{Broker, Delivery, Headers, OutgoingMessage, PendingDelivery};
pub use context::RequestContext;
pub use drain::ErrorDrain;
pub use error::{DeliveryFailure, Error, Result};
pub use handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
pub use handlers::AppState;
pub use kafka::{KafkaBroker, client_config};
pub use producer::{
    Acks, Compression, DeliveryMode, DeliveryPolicy, Produced, ProducerConfig, TracedProducer,
    build_producer,
};
pub use request::Request;
pub use response::{Body, ContentType, IntoReply, Reply};
pub use server::{Server, shutdown_signal};
pub use service::{RouteEntry, Service};
pub use store::{Param, PgStore, Store};
pub use telemetry::{ActiveSpan, OtelEmitter, TraceEmitter};
