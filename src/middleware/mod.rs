//! Middleware layer.
//!
//! Middleware intercepts requests on their way to the terminal handler and
//! is the place for cross-cutting concerns. subreq ships three:
//!
//! - [`Recover`]: outermost; turns a panic anywhere inside into a `500`
//! - [`DumpRequest`]: logs the request head when `--debug` is on
//! - [`VerifyToken`]: the gatekeeper; `401` unless the access JWT checks out
//!
//! A pipeline is a plain ordered list folded around the terminal handler by
//! [`compose`]. The first entry is the outermost wrapper:
//!
//! ```text
//! compose([Recover, DumpRequest, VerifyToken], no_content)
//!     == Recover(DumpRequest(VerifyToken(no_content)))
//! ```

use std::sync::Arc;

use crate::handler::BoxedHandler;

mod dump;
mod recover;
mod verify;

pub use dump::DumpRequest;
pub use recover::Recover;
pub use verify::{ACCESS_TOKEN_HEADER, VerifyToken};

/// A stage that wraps a handler in another handler.
///
/// `wrap` runs once at startup, never per request. The returned handler owns
/// `next` and decides whether, and how, to call it.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

/// Folds `middleware` around `terminal`, first entry outermost.
///
/// An empty list hands back `terminal` itself, not a wrapper around it.
pub fn compose(middleware: &[Arc<dyn Middleware>], terminal: BoxedHandler) -> BoxedHandler {
    middleware
        .iter()
        .rev()
        .fold(terminal, |inner, m| m.wrap(inner))
}
