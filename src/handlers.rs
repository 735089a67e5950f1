//! Route handlers for the chat API.
//!
//! | Route | Body | Effect |
//! |---|---|---|
//! | `POST /chat` | `{"channel": "...", "msg": "..."}` | produce `msg` to the chat topic, keyed by channel |
//! | `POST /create/channel` | `{"channel": "..."}` | insert a channel row |
//! | `POST /create/user` | `{"user": "..."}` | insert a user row |
//!
//! All three answer `200 {"msg":"ok"}` on success.

use std::sync::Arc;

use http::Method;
use opentelemetry::KeyValue;
use opentelemetry::trace::SpanKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broker::OutgoingMessage;
use crate::error::{Error, Result};
use crate::health;
use crate::middleware;
use crate::producer::TracedProducer;
use crate::request::Request;
use crate::response::Reply;
use crate::service::Service;
use crate::store::{Param, Store};
use crate::telemetry::{ActiveSpan, TraceEmitter};

pub const INSERT_CHANNEL: &str = "INSERT INTO channels (uuid, name) VALUES ($1, $2)";
pub const INSERT_USER: &str = "INSERT INTO users (uuid, name) VALUES ($1, $2)";

/// Shared dependencies, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub producer: Arc<TracedProducer>,
    pub store: Arc<dyn Store>,
    pub emitter: Option<Arc<dyn TraceEmitter>>,
    pub chat_topic: String,
}

impl AppState {
    /// Starts a server span for `req` if tracing is enabled and returns the
    /// request with the span's context attached.
    fn start_span(&self, name: &'static str, mut req: Request) -> (Request, Option<ActiveSpan>) {
        let Some(emitter) = &self.emitter else { return (req, None) };
        let span = emitter.start_span(
            req.context().trace(),
            name.into(),
            SpanKind::Server,
            vec![
                KeyValue::new("http.request.method", req.method().to_string()),
                KeyValue::new("url.path", req.path().to_owned()),
            ],
        );
        let cx = req.context().clone().with_trace(span.context().clone());
        *req.context_mut() = cx;
        (req, Some(span))
    }
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub msg: &'static str,
}

fn ok() -> Reply {
    Reply::ok_json(&OkResponse { msg: "ok" })
}

#[derive(Debug, Deserialize)]
pub struct PostChatRequest {
    pub channel: String,
    pub msg: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub channel: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub user: String,
}

/// `POST /chat`
pub async fn post_chat(state: AppState, req: Request) -> Result<Reply> {
    let (req, span) = state.start_span("POST /chat", req);
    let body: PostChatRequest = req.json()?;
    if body.msg.is_empty() {
        return Err(Error::Decode("`msg` must not be empty".into()));
    }

    let message = OutgoingMessage::new(state.chat_topic.as_str(), body.msg).with_key(body.channel);
    if let Err(e) = state.producer.produce_message(req.context(), message).await {
        if let Some(span) = &span {
            span.record_error(e.to_string());
        }
        return Err(e);
    }
    Ok(ok())
}

/// `POST /create/channel`
pub async fn create_channel(state: AppState, req: Request) -> Result<Reply> {
    let (req, _span) = state.start_span("POST /create/channel", req);
    let body: CreateChannelRequest = req.json()?;
    state
        .store
        .execute(INSERT_CHANNEL, &[Param::Uuid(Uuid::new_v4()), Param::Text(body.channel)])
        .await?;
    Ok(ok())
}

/// `POST /create/user`
pub async fn create_user(state: AppState, req: Request) -> Result<Reply> {
    let (req, _span) = state.start_span("POST /create/user", req);
    let body: CreateUserRequest = req.json()?;
    state
        .store
        .execute(INSERT_USER, &[Param::Uuid(Uuid::new_v4()), Param::Text(body.user)])
        .await?;
    Ok(ok())
}

/// Registers every route on `service`.
pub fn register(service: &mut Service, state: AppState) -> Result<()> {
    let json = || [middleware::trace(), middleware::content_type("application/json")];

    let s = state.clone();
    service.post("/chat", move |req: Request| post_chat(s.clone(), req), json())?;
    let s = state.clone();
    service.post("/create/channel", move |req: Request| create_channel(s.clone(), req), json())?;
    let s = state.clone();
    service.post("/create/user", move |req: Request| create_user(s.clone(), req), json())?;

    service.get("/healthz", health::liveness, [])?;
    service.route(Method::GET, "/readyz", move |req: Request| health::readiness(state.clone(), req), [])?;
    Ok(())
}
