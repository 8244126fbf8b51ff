use std::fmt;

/// Error taxonomy shared across every scheduling component.
///
/// Each variant carries enough context to log usefully and to be mapped
/// to an HTTP status code or a CLI exit code by the callers that need to.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),

    #[error("stale: {0}")]
    Stale(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::NotFound(_) => ErrorKind::NotFound,
            SchedulerError::Conflict(_) => ErrorKind::Conflict,
            SchedulerError::Transient(_) => ErrorKind::Transient,
            SchedulerError::Permanent(_) => ErrorKind::Permanent,
            SchedulerError::Stale(_) => ErrorKind::Stale,
            SchedulerError::RateLimited(_) => ErrorKind::RateLimited,
            SchedulerError::Db(sqlx::Error::RowNotFound) => ErrorKind::NotFound,
            SchedulerError::Db(_) => ErrorKind::Transient,
        }
    }

    /// Whether a retry loop (see the backoff helper in `sched-db`) should
    /// attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::RateLimited)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Transient,
    Permanent,
    Stale,
    RateLimited,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Stale => "stale",
            ErrorKind::RateLimited => "rate_limited",
        };
        f.write_str(s)
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
