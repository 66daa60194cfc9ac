//! Unified error type.

use thiserror::Error;

/// The error type returned by subreq's fallible startup operations.
///
/// Request-level failures (missing or rejected tokens, recovered panics) are
/// expressed as HTTP [`Response`](crate::Response) values, not as `Error`s.
/// This type surfaces the conditions that stop the process from serving:
/// bad configuration and listener I/O.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}
