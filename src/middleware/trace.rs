use std::time::Instant;

use tracing::{info, warn};

use super::Middleware;
use crate::request::Request;

/// Logs one line per request: method, path, status and latency.
pub fn trace() -> Middleware {
    Middleware::from_fn(|req: Request, next| async move {
        let method = req.method().clone();
        let path = req.path().to_owned();
        let start = Instant::now();

        let reply = next.run(req).await;

        let status = reply.status().as_u16();
        let latency_ms = start.elapsed().as_millis() as u64;
        if reply.status().is_server_error() {
            warn!(%method, %path, status, latency_ms, "request");
        } else {
            info!(%method, %path, status, latency_ms, "request");
        }
        reply
    })
}
