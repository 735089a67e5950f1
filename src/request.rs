//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::de::DeserializeOwned;

use crate::context::RequestContext;
use crate::error::{Error, Result};

/// An incoming HTTP request with its body fully read.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) context: RequestContext,
}

impl Request {
    /// Builds a request by hand, e.g. to drive a [`Service`](crate::Service)
    /// without a socket.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            params: HashMap::new(),
            context: RequestContext::background(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn context(&self) -> &RequestContext { &self.context }
    pub fn context_mut(&mut self) -> &mut RequestContext { &mut self.context }

    /// Header lookup. Values that are not visible ASCII are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Decodes the body as JSON. Malformed bodies yield [`Error::Decode`].
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize)]
    struct Channel {
        channel: String,
    }

    #[test]
    fn decodes_json_body() {
        let req = Request::new(Method::POST, "/create/channel").with_body(r#"{"channel":"general"}"#);
        let decoded: Channel = req.json().unwrap();
        assert_eq!(decoded.channel, "general");
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        let req = Request::new(Method::POST, "/create/channel").with_body("{not json");
        assert!(matches!(req.json::<Channel>(), Err(Error::Decode(_))));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = Request::new(Method::GET, "/")
            .with_header(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert_eq!(req.header("Content-Type"), Some("application/json"));
    }
}
