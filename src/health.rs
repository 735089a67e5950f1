//! Health-check handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the process serve traffic? Failure → pulled from the load balancer. |

use http::StatusCode;

use crate::handlers::AppState;
use crate::request::Request;
use crate::response::Reply;

/// Always `200 OK` with body `"ok"`. No dependencies on purpose.
pub async fn liveness(_req: Request) -> Reply {
    Reply::text(StatusCode::OK, "ok")
}

/// `200 "ready"` while the producer is open and the store answers,
/// `503` otherwise.
pub async fn readiness(state: AppState, _req: Request) -> Reply {
    if state.producer.is_closed() {
        return Reply::text(StatusCode::SERVICE_UNAVAILABLE, "producer closed");
    }
    if let Err(e) = state.store.ping().await {
        tracing::warn!(error = %e, "readiness: store unreachable");
        return Reply::text(StatusCode::SERVICE_UNAVAILABLE, "store unreachable");
    }
    Reply::text(StatusCode::OK, "ready")
}
