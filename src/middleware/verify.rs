//! The gatekeeper stage.
//!
//! Every outcome here is an ordinary response: `401` with a reason, or
//! whatever the next stage returns. Nothing is escalated.

use std::sync::Arc;

use tracing::debug;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::middleware::Middleware;
use crate::verifier::{TokenVerifier, VerifyError};
use crate::{Request, Response, Status};

/// Header Cloudflare Access puts the signed application token in.
pub const ACCESS_TOKEN_HEADER: &str = "cf-access-jwt-assertion";

/// Lets a request through only if its access token verifies.
#[derive(Clone)]
pub struct VerifyToken {
    verifier: Arc<dyn TokenVerifier>,
}

impl VerifyToken {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { verifier }
    }
}

impl Middleware for VerifyToken {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(VerifyHandler { verifier: Arc::clone(&self.verifier), next })
    }
}

struct VerifyHandler {
    verifier: Arc<dyn TokenVerifier>,
    next: BoxedHandler,
}

impl ErasedHandler for VerifyHandler {
    fn call(&self, req: Request) -> BoxFuture {
        let verifier = Arc::clone(&self.verifier);
        let next = Arc::clone(&self.next);

        Box::pin(async move {
            // Present but not visible ASCII cannot be a JWT; reject it as one.
            let token = match req.headers().get(ACCESS_TOKEN_HEADER) {
                Some(value) if !value.is_empty() => value
                    .to_str()
                    .map_err(|_| VerifyError::Malformed("token is not visible ASCII".to_owned())),
                _ => {
                    debug!(uri = %req.uri(), "request without access token");
                    return unauthorized("missing access token on request".to_owned());
                }
            };

            let verdict = match token {
                Ok(token) => verifier.verify(token).await.map(drop),
                Err(e) => Err(e),
            };
            if let Err(e) = verdict {
                debug!(uri = %req.uri(), error = %e, "access token rejected");
                return unauthorized(format!("Invalid token: {e}"));
            }

            next.call(req).await
        })
    }
}

fn unauthorized(reason: String) -> Response {
    Response::builder().status(Status::Unauthorized).text(reason)
}
