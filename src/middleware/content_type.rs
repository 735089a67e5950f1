use http::StatusCode;

use super::Middleware;
use crate::request::Request;
use crate::response::Reply;

/// Rejects requests whose `Content-Type` is set to something other than
/// `expected` with `415 Unsupported Media Type`.
///
/// A missing header is accepted; clients like `curl -d` often omit it.
/// Parameters such as `; charset=utf-8` are ignored when comparing.
pub fn content_type(expected: &'static str) -> Middleware {
    Middleware::from_fn(move |req: Request, next| async move {
        if let Some(actual) = req.header("content-type") {
            let essence = actual.split(';').next().unwrap_or("").trim();
            if !essence.eq_ignore_ascii_case(expected) {
                return Reply::json(
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    &serde_json::json!({ "error": format!("expected content-type {expected}") }),
                );
            }
        }
        next.run(req).await
    })
}
