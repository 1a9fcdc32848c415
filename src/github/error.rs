use chrono::{DateTime, Utc};

/// Errors from the GitHub API.
///
/// `RateLimited` is the only variant batch operations treat as fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GithubError {
  #[error("GitHub API rate limit exceeded. Reset at {}", .reset_time.format("%H:%M:%S UTC"))]
  RateLimited { reset_time: DateTime<Utc> },

  #[error("{0} not found")]
  NotFound(String),

  #[error("malformed response for {what}: {message}")]
  Malformed { what: String, message: String },

  #[error("network error: {0}")]
  Network(String),

  #[error("GitHub API returned {status} for {what}: {message}")]
  Api {
    status: u16,
    what: String,
    message: String,
  },

  #[error("not authenticated with GitHub")]
  Unauthenticated,
}
