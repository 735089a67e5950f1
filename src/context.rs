//! Per-call context: the caller's trace context plus an optional deadline.

use std::time::Duration;

use tokio::time::Instant;

/// Travels with a request from the dispatch layer into handlers and down to
/// [`TracedProducer::produce_message`](crate::TracedProducer::produce_message).
///
/// Cancellation is the dropping of the future holding the context; the
/// deadline bounds every blocking wait made on the caller's behalf.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    trace: opentelemetry::Context,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// No trace parent, no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_trace(mut self, trace: opentelemetry::Context) -> Self {
        self.trace = trace;
        self
    }

    pub fn trace(&self) -> &opentelemetry::Context { &self.trace }
    pub fn deadline(&self) -> Option<Instant> { self.deadline }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }
}
