//! HTTP status codes as a typed enum.
//!
//! An auth subrequest endpoint speaks a very small vocabulary. nginx's
//! `auth_request` only distinguishes 2xx (allow), 401/403 (deny) and
//! everything else (error), so these are the only codes subreq emits.
//!
//! ```rust
//! use subreq::{Response, Status};
//!
//! Response::status(Status::NoContent);
//!
//! // return Status directly from a handler; subreq wraps it
//! async fn allow(_req: subreq::Request) -> Status {
//!     Status::NoContent
//! }
//! ```

/// The status codes produced by the pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Ok,                  // 200
    NoContent,           // 204
    Unauthorized,        // 401
    InternalServerError, // 500
}

impl From<Status> for u16 {
    fn from(s: Status) -> u16 {
        match s {
            Status::Ok                  => 200,
            Status::NoContent           => 204,
            Status::Unauthorized        => 401,
            Status::InternalServerError => 500,
        }
    }
}

impl From<Status> for http::StatusCode {
    fn from(s: Status) -> http::StatusCode {
        match s {
            Status::Ok                  => http::StatusCode::OK,
            Status::NoContent           => http::StatusCode::NO_CONTENT,
            Status::Unauthorized        => http::StatusCode::UNAUTHORIZED,
            Status::InternalServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
