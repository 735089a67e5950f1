//! Handler results and the [`IntoReply`] conversion trait.
//!
//! A handler never writes to the connection. It returns a [`Reply`], a status
//! code plus a [`Body`], and the dispatch layer is the single place that turns
//! it into wire bytes.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use http_body_util::Full;
use serde::Serialize;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content-type values for raw bodies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
        }
    }
}

// ── Body ──────────────────────────────────────────────────────────────────────

/// The closed set of response bodies.
///
/// `Raw` bytes are written verbatim; `Json` values are serialised by the
/// dispatch layer when the response is emitted.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Empty,
    Raw { bytes: Bytes, content_type: Option<ContentType> },
    Json(serde_json::Value),
}

impl Body {
    /// Wire bytes for this body.
    pub fn into_bytes(self) -> Result<Bytes, serde_json::Error> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Raw { bytes, .. } => Ok(bytes),
            Self::Json(value) => serde_json::to_vec(&value).map(Bytes::from),
        }
    }

    fn content_type(&self) -> Option<ContentType> {
        match self {
            Self::Empty => None,
            Self::Raw { content_type, .. } => *content_type,
            Self::Json(_) => Some(ContentType::Json),
        }
    }
}

// ── Reply ─────────────────────────────────────────────────────────────────────

/// The `(status, body)` pair every handler invocation produces.
///
/// ```rust
/// use franz::{Body, Reply};
/// use http::StatusCode;
///
/// Reply::ok_json(&serde_json::json!({ "msg": "ok" }));
/// Reply::text(StatusCode::OK, "ready");
/// Reply::new(StatusCode::NO_CONTENT, Body::Empty);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
}

impl Reply {
    pub fn new(status: StatusCode, body: Body) -> Self {
        Self { status, headers: HeaderMap::new(), body }
    }

    /// Adds a response header. `Content-Type` is derived from the body and
    /// overrides one set here.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Reply with no body.
    pub fn status_only(status: StatusCode) -> Self {
        Self::new(status, Body::Empty)
    }

    /// Structured reply. A value that cannot be represented as JSON becomes a
    /// bare `500`.
    pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Self::new(status, Body::Json(value)),
            Err(e) => {
                tracing::error!(error = %e, "reply body is not serialisable");
                Self::status_only(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// `200 OK` with a structured body.
    pub fn ok_json<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::json(StatusCode::OK, value)
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::bytes(status, ContentType::Text, body.into())
    }

    pub fn bytes(status: StatusCode, content_type: ContentType, body: impl Into<Bytes>) -> Self {
        Self::new(status, Body::Raw { bytes: body.into(), content_type: Some(content_type) })
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Body { &self.body }
    pub fn into_body(self) -> Body { self.body }

    /// Converts into the hyper response written to the connection.
    pub(crate) fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut content_type = self.body.content_type();
        let (status, bytes) = match self.body.into_bytes() {
            Ok(bytes) => (self.status, bytes),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialise reply body");
                content_type = None;
                (StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
            }
        };

        let mut response = http::Response::new(Full::new(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        if let Some(ct) = content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(ct.as_str()));
        }
        response
    }
}

// ── IntoReply ─────────────────────────────────────────────────────────────────

/// Conversion into a [`Reply`].
///
/// Implemented for the values handlers naturally return, including
/// `Result<R, Error>` so handlers can use `?` and still produce exactly one
/// reply per invocation.
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply { self }
}

impl IntoReply for StatusCode {
    fn into_reply(self) -> Reply { Reply::status_only(self) }
}

impl IntoReply for (StatusCode, Body) {
    fn into_reply(self) -> Reply { Reply::new(self.0, self.1) }
}

impl IntoReply for (StatusCode, serde_json::Value) {
    fn into_reply(self) -> Reply { Reply::new(self.0, Body::Json(self.1)) }
}

impl IntoReply for (StatusCode, Bytes) {
    fn into_reply(self) -> Reply {
        Reply::new(self.0, Body::Raw { bytes: self.1, content_type: None })
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Reply { Reply::text(StatusCode::OK, self) }
}

impl IntoReply for String {
    fn into_reply(self) -> Reply { Reply::text(StatusCode::OK, self) }
}

impl<R: IntoReply> IntoReply for Result<R, crate::Error> {
    fn into_reply(self) -> Reply {
        match self {
            Ok(r) => r.into_reply(),
            Err(e) => e.into_reply(),
        }
    }
}
