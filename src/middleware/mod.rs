//! Middleware layer.
//!
//! A [`Middleware`] turns one handler into another. It is the place for
//! cross-cutting concerns: request logging, content negotiation, deadlines.
//!
//! # Composition
//!
//! For `[m1, m2]` registered around `h`, the effective handler is
//! `m1(m2(h))`: the first listed middleware is the outermost and sees the
//! request first and the reply last. A middleware may short-circuit by
//! returning a reply without calling [`Next::run`].
//!
//! ```rust
//! use franz::middleware::{self, Middleware};
//! use franz::{Reply, Request};
//! use http::StatusCode;
//!
//! let require_body = Middleware::from_fn(|req: Request, next| async move {
//!     if req.body().is_empty() {
//!         return Reply::status_only(StatusCode::BAD_REQUEST);
//!     }
//!     next.run(req).await
//! });
//! let stack = [middleware::trace(), require_body];
//! # let _ = stack;
//! ```

mod content_type;
mod trace;

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;
use crate::response::Reply;

pub use content_type::content_type;
pub use trace::trace;

/// A transformation from handler to handler.
#[derive(Clone)]
pub struct Middleware(Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync>);

impl Middleware {
    /// Wraps a raw handler transformation.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Builds a middleware from an async function of the request and the
    /// wrapped handler.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Reply> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |inner| Arc::new(FromFn { f: Arc::clone(&f), inner }))
    }

    pub fn wrap(&self, handler: BoxedHandler) -> BoxedHandler {
        (self.0)(handler)
    }
}

/// Applies `middleware` around `handler` so that the first element ends up
/// outermost.
pub fn compose(handler: BoxedHandler, middleware: &[Middleware]) -> BoxedHandler {
    middleware.iter().rev().fold(handler, |h, m| m.wrap(h))
}

/// Returns the wrapped handler unchanged.
pub fn no_op() -> Middleware {
    Middleware::new(|inner| inner)
}

/// The rest of the chain, handed to [`Middleware::from_fn`] functions.
pub struct Next(BoxedHandler);

impl Next {
    pub async fn run(self, req: Request) -> Reply {
        self.0.call(req).await
    }
}

struct FromFn<F> {
    f: Arc<F>,
    inner: BoxedHandler,
}

impl<F, Fut> ErasedHandler for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        Box::pin((self.f)(req, Next(Arc::clone(&self.inner))))
    }
}
