//! The call primitive every pipeline stage implements.
//!
//! A [`Caller`] sends a [`Request`] and yields a [`Response`] or a
//! [`CallError`]. Stages wrap one another by holding the next `Caller` and
//! delegating to it, so behaviour composes without touching call sites:
//!
//! ```text
//! Cacher ──► Instrumented ──► BaseClient ──► TCP
//! ```
//!
//! ## Core types
//!
//! - [`Caller`] — trait implemented by every stage.
//! - [`BoxFuture`] — the pinned, boxed future a `Caller` returns.
//! - [`CallError`] — transport failure surfaced to the original caller.
//! - [`BaseClient`] — the leaf stage that talks HTTP/1.1 over TCP.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use thiserror::Error;

use crate::http::{Request, Response, ResponseError};

mod transport;

pub use transport::BaseClient;

/// A pinned, heap-allocated, `Send` future borrowed for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors produced while performing a call.
///
/// Every stage returns this type; stages that only observe or cache pass it
/// through unchanged.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request has no host to connect to")]
    MissingHost,

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("response exceeds maximum allowed size of {max_bytes} bytes")]
    ResponseTooLarge { max_bytes: usize },

    #[error("malformed response: {0}")]
    Response(#[from] ResponseError),
}

/// The core trait for every stage of the call pipeline.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync`; a single stage is shared by
///   many concurrent tasks.
/// - Decorating stages **must** return the wrapped stage's error untouched.
///
/// # Examples
///
/// ```rust,no_run
/// use cachet::caller::{BoxFuture, CallError, Caller};
/// use cachet::http::{Request, Response, StatusCode};
///
/// struct Static;
///
/// impl Caller for Static {
///     fn call(&self, _req: Request) -> BoxFuture<'_, Result<Response, CallError>> {
///         Box::pin(async { Ok(Response::new(StatusCode::OK).body("static")) })
///     }
/// }
/// ```
pub trait Caller: Send + Sync {
    /// Performs `req` and returns its response.
    fn call(&self, req: Request) -> BoxFuture<'_, Result<Response, CallError>>;
}

impl<C> Caller for Arc<C>
where
    C: Caller + ?Sized,
{
    fn call(&self, req: Request) -> BoxFuture<'_, Result<Response, CallError>> {
        (**self).call(req)
    }
}

impl<C> Caller for Box<C>
where
    C: Caller + ?Sized,
{
    fn call(&self, req: Request) -> BoxFuture<'_, Result<Response, CallError>> {
        (**self).call(req)
    }
}
