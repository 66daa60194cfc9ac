//! # subreq
//!
//! An authorization endpoint for nginx's `auth_request`. nginx sends a
//! subrequest for every protected request; subreq answers `204` (allow) or
//! `401` (deny) depending on whether the Cloudflare Access JWT in the
//! `Cf-Access-Jwt-Assertion` header verifies.
//!
//! ## The contract
//!
//! nginx owns the original request: TLS, the body, forwarding, retries.
//! subreq only ever sees the request head and only ever answers yes or no.
//! It does not issue tokens, keep sessions, or do its own cryptography;
//! signatures are checked with [`jsonwebtoken`] against the provider's
//! published key set.
//!
//! ## The pipeline
//!
//! ```text
//! request → Recover → (DumpRequest, with --debug) → VerifyToken → no_content
//! ```
//!
//! Each stage can answer on its own and stop the request there. The list is
//! composed once at startup and shared by every connection.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use subreq::middleware::{compose, Middleware, Recover, VerifyToken};
//! use subreq::verifier::{IdTokenVerifier, RemoteKeySet};
//! use subreq::{terminal, Handler, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let domain = "https://team.cloudflareaccess.com";
//!     let keys = Arc::new(RemoteKeySet::new(subreq::config::certs_url(domain))?);
//!     let verifier = Arc::new(IdTokenVerifier::new(domain, "my-aud-tag", keys));
//!
//!     let stages: Vec<Arc<dyn Middleware>> = vec![
//!         Arc::new(Recover),
//!         Arc::new(VerifyToken::new(verifier)),
//!     ];
//!     let handler = compose(&stages, terminal::no_content.into_boxed_handler());
//!
//!     Server::bind("[::]:3000".parse()?).await?.serve(handler).await?;
//!     Ok(())
//! }
//! ```

mod error;
mod handler;
mod request;
mod response;
mod server;
mod status;

pub mod config;
pub mod middleware;
pub mod terminal;
pub mod verifier;


pub use error::Error;
pub use handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use server::Server;
pub use status::Status;

use std::sync::Arc;

use crate::config::Config;
use crate::middleware::{DumpRequest, Middleware, Recover, VerifyToken};
use crate::verifier::TokenVerifier;

/// The middleware list for `config`, outermost first.
///
/// `Recover` always leads; `DumpRequest` is included only with `--debug`.
pub fn pipeline(config: &Config, verifier: Arc<dyn TokenVerifier>) -> Vec<Arc<dyn Middleware>> {
    let mut stages: Vec<Arc<dyn Middleware>> = vec![Arc::new(Recover)];
    if config.debug {
        stages.push(Arc::new(DumpRequest));
    }
    stages.push(Arc::new(VerifyToken::new(verifier)));
    stages
}
