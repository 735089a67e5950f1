//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! The service holds handlers of *different* types in one routing table, so
//! each is hidden behind a trait object (`dyn ErasedHandler`). Middleware
//! works on the same erased form: it takes a [`BoxedHandler`] and returns a
//! new one.
//!
//! ```text
//! async fn chat(req: Request) -> Result<Reply, Error>   ← user writes this
//!        ↓ service.post("/chat", chat, [..])
//! chat.into_boxed_handler()                             ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(chat))                             ← BoxedHandler
//!        ↓ middleware::compose(handler, &middleware)
//! m1.wrap(m2.wrap(handler))                             ← still a BoxedHandler
//!        ↓
//! handler.call(req) at request time                     ← one vtable dispatch per layer
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoReply, Reply};

/// A heap-allocated, type-erased future that resolves to a [`Reply`].
pub type BoxFuture = Pin<Box<dyn Future<Output = Reply> + Send + 'static>>;

/// Uniform handler contract: one request in, exactly one reply out.
///
/// Public so middleware can call the handler it wraps.
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid route handler.
///
/// Satisfied by any function or closure with the shape
///
/// ```text
/// Fn(Request) -> impl Future<Output = impl IntoReply>
/// ```
///
/// Sealed: only the blanket impl below exists.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Holds a concrete handler `F` and bridges it to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_reply() })
    }
}
