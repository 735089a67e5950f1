//! Background reporting of asynchronous delivery failures.
//!
//! One drain runs per asynchronous producer. It only ever *receives* from
//! the error channel; the producer owns the sending half and closing it is
//! what stops the drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::DeliveryFailure;

/// Handle to a running drain task.
pub struct ErrorDrain {
    handle: JoinHandle<u64>,
}

impl ErrorDrain {
    /// Spawns the drain. Every failure received bumps `reported`.
    pub fn spawn(errors: mpsc::UnboundedReceiver<DeliveryFailure>, reported: Arc<AtomicU64>) -> Self {
        Self { handle: tokio::spawn(run(errors, reported)) }
    }

    /// `true` once the error channel has closed and every failure was
    /// reported.
    pub fn is_stopped(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the drain to stop and returns how many failures it reported.
    pub async fn join(self) -> u64 {
        match self.handle.await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "error drain task failed");
                0
            }
        }
    }
}

async fn run(mut errors: mpsc::UnboundedReceiver<DeliveryFailure>, reported: Arc<AtomicU64>) -> u64 {
    let mut count = 0;
    while let Some(failure) = errors.recv().await {
        count += 1;
        reported.fetch_add(1, Ordering::Relaxed);
        error!(
            topic = %failure.topic,
            reason = %failure.reason,
            retriable = failure.retriable,
            "failed to write message to broker"
        );
    }
    debug!(reported = count, "error drain stopped");
    count
}
