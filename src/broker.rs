//! Broker capability consumed by the producer.
//!
//! franz does not speak the broker's wire protocol. It drives a client that
//! implements [`Broker`]; production uses [`KafkaBroker`](crate::KafkaBroker).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use opentelemetry::propagation::Injector;

use crate::error::{DeliveryFailure, Error, Result};

/// Header carrier for an outgoing message. Trace context is injected here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an existing value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl Injector for Headers {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key, value);
    }
}

/// A message on its way to the broker. Built per call and moved into the
/// broker client on handoff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Bytes,
    pub headers: Headers,
}

impl OutgoingMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload: payload.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(Error::InvalidMessage("topic must not be empty"));
        }
        if self.payload.is_empty() {
            return Err(Error::InvalidMessage("payload must not be empty"));
        }
        Ok(())
    }
}

/// Where the broker stored an acknowledged message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Resolves once the broker acknowledges a handed-off message, or the client
/// gives up on it.
pub type PendingDelivery = BoxFuture<'static, std::result::Result<Delivery, DeliveryFailure>>;

/// A connected broker client.
///
/// Handoff and acknowledgment are separate steps: [`enqueue`](Broker::enqueue)
/// places the message on the client's outgoing queue before it returns, so
/// messages enqueued in sequence reach the client in that sequence. Only the
/// wait for the acknowledgment runs concurrently.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Hands `message` to the client and returns the pending acknowledgment.
    fn enqueue(&self, message: OutgoingMessage) -> PendingDelivery;

    /// Sends one message and resolves once the broker acknowledges it under
    /// the client's acknowledgment policy, or the client gives up.
    async fn send(&self, message: OutgoingMessage) -> std::result::Result<Delivery, DeliveryFailure> {
        self.enqueue(message).await
    }

    /// Flushes buffered messages, waiting at most `timeout`.
    async fn close(&self, timeout: Duration) -> Result<()>;
}
