//! Panic isolation for everything inside the pipeline.
//!
//! A panic in a hyper service future tears down the connection task and the
//! proxy sees a reset instead of an answer. `Recover` sits outermost and
//! catches the unwind at its own boundary, so the client gets exactly one
//! `500` and the process keeps serving.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::error;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::middleware::Middleware;
use crate::{Request, Response, Status};

/// Converts a panic raised by any inner stage into `500 Internal Server Error`.
///
/// Responses are values here, not writes, so a panicking stage has by
/// construction produced nothing yet: the `500` is always the only response.
#[derive(Clone, Copy, Debug, Default)]
pub struct Recover;

impl Middleware for Recover {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(RecoverHandler { next })
    }
}

struct RecoverHandler {
    next: BoxedHandler,
}

impl ErasedHandler for RecoverHandler {
    fn call(&self, req: Request) -> BoxFuture {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let next = Arc::clone(&self.next);

        Box::pin(async move {
            // `call` itself may panic before handing back a future, so it runs
            // inside the guarded block too.
            let guarded = AssertUnwindSafe(async move { next.call(req).await }).catch_unwind();
            match guarded.await {
                Ok(res) => res,
                Err(payload) => {
                    error!(%method, %uri, panic = %panic_message(payload.as_ref()), "recovered from panic");
                    Response::status(Status::InternalServerError)
                }
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
