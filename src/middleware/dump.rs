//! Request dump for `--debug`.
//!
//! Logs the request head (request line + headers, never the body) in wire
//! form, then hands the request on unchanged. Turning debug on must not
//! change the auth decision, so this stage always calls `next`, including
//! when the dump itself fails.

use std::sync::Arc;

use tracing::{info, warn};

use crate::Request;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::middleware::Middleware;

/// Logs every request at `info` before passing it to the next stage.
#[derive(Clone, Copy, Debug, Default)]
pub struct DumpRequest;

impl Middleware for DumpRequest {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(DumpHandler { next })
    }
}

struct DumpHandler {
    next: BoxedHandler,
}

impl ErasedHandler for DumpHandler {
    fn call(&self, req: Request) -> BoxFuture {
        match dump(&req) {
            Ok(text) => info!("got request:\n{text}"),
            Err(e) => warn!(error = %e, "could not dump request"),
        }
        self.next.call(req)
    }
}

/// Renders the request head the way it would appear on an HTTP/1.x wire.
///
/// Fails on header values that are not visible ASCII rather than logging
/// raw bytes.
pub(crate) fn dump(req: &Request) -> Result<String, DumpError> {
    let target = req.uri().path_and_query().map_or("/", |pq| pq.as_str());
    let mut out = format!("{} {} {:?}\r\n", req.method(), target, req.version());

    if req.headers().get(http::header::HOST).is_none() {
        if let Some(authority) = req.uri().authority() {
            out.push_str(&format!("host: {authority}\r\n"));
        }
    }
    for (name, value) in req.headers() {
        let value = value
            .to_str()
            .map_err(|_| DumpError::UnprintableHeader(name.as_str().to_owned()))?;
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum DumpError {
    #[error("header `{0}` is not printable")]
    UnprintableHeader(String),
}
