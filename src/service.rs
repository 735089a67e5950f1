//! Dispatch service: route table plus the request → reply adaptation.
//!
//! One radix tree per HTTP method, O(path-length) lookup. Routes are
//! registered with their middleware while the service is being built; once
//! it is handed to [`Server::serve`](crate::Server::serve) it is owned by the
//! server and no further registration is possible.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode, header};
use http_body_util::{BodyExt, Full};
use matchit::{InsertError, Router as MatchitRouter};
use tokio::time::timeout_at;
use tracing::{info, warn};

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{self, Middleware};
use crate::request::Request;
use crate::response::{IntoReply, Reply};
use crate::telemetry::TraceEmitter;

/// A registered `(method, pattern)` pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    pub method: Method,
    pub pattern: String,
}

/// The dispatch service.
///
/// ```rust,no_run
/// use franz::{middleware, Reply, Request, Service};
/// use http::Method;
///
/// async fn chat(_req: Request) -> Reply {
///     Reply::ok_json(&serde_json::json!({ "msg": "ok" }))
/// }
///
/// # fn main() -> franz::Result<()> {
/// let mut service = Service::new();
/// service.route(Method::POST, "/chat", chat, [middleware::trace()])?;
/// # Ok(()) }
/// ```
pub struct Service {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    entries: Vec<RouteEntry>,
    request_timeout: Option<Duration>,
    emitter: Option<Arc<dyn TraceEmitter>>,
}

impl Service {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            entries: Vec::new(),
            request_timeout: None,
            emitter: None,
        }
    }

    /// Every request gets a deadline this far in the future. A handler still
    /// running at the deadline is abandoned and answered with `504`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Extract the caller's W3C trace context from inbound headers.
    pub fn with_trace_emitter(mut self, emitter: Arc<dyn TraceEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Registers `handler` for `method` + `pattern`, wrapped in `middleware`
    /// (first listed is outermost).
    ///
    /// Path parameters use `{name}` syntax. Fails with
    /// [`Error::RouteConflict`] when the pair is already registered and with
    /// [`Error::InvalidRoute`] when the pattern is malformed or ambiguous
    /// with an existing one. Patterns that differ only in parameter names,
    /// such as `/a/{x}` and `/a/{y}`, match the same paths and count as
    /// ambiguous.
    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler,
        middleware: impl IntoIterator<Item = Middleware>,
    ) -> Result<&mut Self> {
        if self.entries.iter().any(|e| e.method == method && e.pattern == pattern) {
            return Err(Error::RouteConflict { method, pattern: pattern.to_owned() });
        }

        let middleware: Vec<Middleware> = middleware.into_iter().collect();
        let composed = middleware::compose(handler.into_boxed_handler(), &middleware);

        self.routes
            .entry(method.clone())
            .or_default()
            .insert(pattern, composed)
            .map_err(|e| match e {
                InsertError::Conflict { with } if with == pattern => {
                    Error::RouteConflict { method: method.clone(), pattern: pattern.to_owned() }
                }
                other => Error::InvalidRoute { pattern: pattern.to_owned(), reason: other.to_string() },
            })?;

        self.entries.push(RouteEntry { method, pattern: pattern.to_owned() });
        Ok(self)
    }

    pub fn get(
        &mut self,
        pattern: &str,
        handler: impl Handler,
        middleware: impl IntoIterator<Item = Middleware>,
    ) -> Result<&mut Self> {
        self.route(Method::GET, pattern, handler, middleware)
    }

    pub fn post(
        &mut self,
        pattern: &str,
        handler: impl Handler,
        middleware: impl IntoIterator<Item = Middleware>,
    ) -> Result<&mut Self> {
        self.route(Method::POST, pattern, handler, middleware)
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.entries
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let matched = self.routes.get(method)?.at(path).ok()?;
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((Arc::clone(matched.value), params))
    }

    /// Methods registered for `path`, for `405` replies.
    fn allowed(&self, path: &str) -> Vec<String> {
        let mut allowed: Vec<String> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(m, _)| m.to_string())
            .collect();
        allowed.sort();
        allowed
    }

    /// Resolves and invokes the handler for `req`. Always yields one reply.
    ///
    /// Replies produced here rather than by a route (404, 405, 504) never
    /// pass through route middleware, so they are logged here.
    pub async fn handle(&self, mut req: Request) -> Reply {
        let start = Instant::now();
        let Some((handler, params)) = self.lookup(&req.method, &req.path) else {
            let reply = self.unmatched(&req.method, &req.path);
            log_reply(&req.method, &req.path, &reply, start);
            return reply;
        };
        req.params = params;

        if let (Some(timeout), None) = (self.request_timeout, req.context.deadline()) {
            req.context = req.context.clone().with_timeout(timeout);
        }

        match req.context.deadline() {
            Some(deadline) => {
                let (method, path) = (req.method.clone(), req.path.clone());
                match timeout_at(deadline, handler.call(req)).await {
                    Ok(reply) => reply,
                    Err(_) => {
                        let reply = Error::DeadlineExceeded.into_reply();
                        log_reply(&method, &path, &reply, start);
                        reply
                    }
                }
            }
            None => handler.call(req).await,
        }
    }

    /// `404`, or `405` with an `Allow` header when other methods match.
    fn unmatched(&self, method: &Method, path: &str) -> Reply {
        let allowed = self.allowed(path);
        if allowed.is_empty() {
            return Error::RouteNotFound { method: method.clone(), path: path.to_owned() }.into_reply();
        }
        let reply = Reply::json(
            StatusCode::METHOD_NOT_ALLOWED,
            &serde_json::json!({ "error": "method not allowed", "allow": allowed }),
        );
        match HeaderValue::from_str(&allowed.join(", ")) {
            Ok(allow) => reply.with_header(header::ALLOW, allow),
            Err(_) => reply,
        }
    }

    /// Adapts a hyper request to [`Service::handle`] and back.
    pub(crate) async fn dispatch<B>(&self, req: http::Request<B>) -> http::Response<Full<Bytes>>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return Error::Decode(format!("failed to read body: {e}")).into_reply().into_http();
            }
        };

        let trace = match &self.emitter {
            Some(emitter) => emitter.extract(&parts.headers),
            None => opentelemetry::Context::new(),
        };

        let req = Request {
            method: parts.method,
            path: parts.uri.path().to_owned(),
            headers: parts.headers,
            body,
            params: HashMap::new(),
            context: RequestContext::background().with_trace(trace),
        };

        self.handle(req).await.into_http()
    }
}

fn log_reply(method: &Method, path: &str, reply: &Reply, start: Instant) {
    let status = reply.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as u64;
    if reply.status().is_server_error() {
        warn!(%method, %path, status, latency_ms, "request");
    } else {
        info!(%method, %path, status, latency_ms, "request");
    }
}

impl Default for Service {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok(_req: Request) -> StatusCode {
        StatusCode::OK
    }

    async fn user(req: Request) -> String {
        req.param("id").unwrap_or("none").to_owned()
    }

    #[test]
    fn duplicate_route_is_a_conflict() {
        let mut service = Service::new();
        service.post("/chat", ok, []).unwrap();
        let err = service.post("/chat", ok, []).err().unwrap();
        assert!(matches!(err, Error::RouteConflict { ref pattern, .. } if pattern == "/chat"));
    }

    #[test]
    fn distinct_routes_register() {
        let mut service = Service::new();
        service
            .post("/chat", ok, []).unwrap()
            .post("/create/channel", ok, []).unwrap()
            .post("/create/user", ok, []).unwrap()
            .get("/chat", ok, []).unwrap();
        assert_eq!(service.routes().len(), 4);
    }

    #[test]
    fn malformed_pattern_is_rejected() {
        let mut service = Service::new();
        let err = service.get("/users/{id", ok, []).err().unwrap();
        assert!(matches!(err, Error::InvalidRoute { .. }));
    }

    #[test]
    fn patterns_differing_only_in_param_name_are_ambiguous() {
        let mut service = Service::new();
        service.get("/a/{x}", ok, []).unwrap();
        let err = service.get("/a/{y}", ok, []).err().unwrap();
        assert!(matches!(err, Error::InvalidRoute { ref pattern, .. } if pattern == "/a/{y}"));
        assert_eq!(service.routes().len(), 1);
    }

    #[test]
    fn same_pattern_under_another_method_registers() {
        let mut service = Service::new();
        service.get("/a/{x}", ok, []).unwrap();
        service.post("/a/{x}", ok, []).unwrap();
        assert_eq!(service.routes().len(), 2);
    }

    #[tokio::test]
    async fn unmatched_request_is_not_found() {
        let service = Service::new();
        let reply = service.handle(Request::new(Method::GET, "/missing")).await;
        assert_eq!(reply.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_method_is_not_allowed() {
        let mut service = Service::new();
        service.post("/chat", ok, []).unwrap();
        service.route(Method::PUT, "/chat", ok, []).unwrap();
        let reply = service.handle(Request::new(Method::GET, "/chat")).await;
        assert_eq!(reply.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(reply.headers().get(header::ALLOW).unwrap(), "POST, PUT");
    }

    #[tokio::test]
    async fn dispatch_sets_allow_header_on_405() {
        let mut service = Service::new();
        service.post("/chat", ok, []).unwrap();
        let req = http::Request::builder()
            .method(Method::GET)
            .uri("/chat")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = service.dispatch(req).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(header::ALLOW).unwrap(), "POST");
    }

    /// Collects formatted log output.
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn unrouted_and_timed_out_replies_are_logged() {
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut service = Service::new().with_request_timeout(Duration::from_millis(20));
        service
            .get("/slow", |_req: Request| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }, [])
            .unwrap();

        service.handle(Request::new(Method::GET, "/missing")).await;
        service.handle(Request::new(Method::POST, "/slow")).await;
        service.handle(Request::new(Method::GET, "/slow")).await;

        let text = logs.text();
        assert!(text.contains("status=404"), "{text}");
        assert!(text.contains("status=405"), "{text}");
        assert!(text.contains("status=504"), "{text}");
    }

    #[tokio::test]
    async fn path_params_reach_handler() {
        let mut service = Service::new();
        service.get("/users/{id}", user, []).unwrap();
        let reply = service.handle(Request::new(Method::GET, "/users/42")).await;
        assert_eq!(&reply.into_body().into_bytes().unwrap()[..], b"42");
    }

    #[tokio::test]
    async fn slow_handler_hits_request_deadline() {
        let mut service = Service::new().with_request_timeout(Duration::from_millis(20));
        service
            .get("/slow", |_req: Request| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }, [])
            .unwrap();
        let reply = service.handle(Request::new(Method::GET, "/slow")).await;
        assert_eq!(reply.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn dispatch_writes_status_and_json() {
        let mut service = Service::new();
        service
            .post("/chat", |_req: Request| async { Reply::ok_json(&serde_json::json!({ "msg": "ok" })) }, [])
            .unwrap();
        let req = http::Request::builder()
            .method(Method::POST)
            .uri("/chat")
            .body(Full::new(Bytes::from_static(b"{}")))
            .unwrap();
        let response = service.dispatch(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"msg":"ok"}"#);
    }
}
