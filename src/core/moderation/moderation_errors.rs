// Error taxonomy for the moderation pipeline.
//
// Raw platform failures arrive as `ApiError` and are classified exactly once
// by `classify`. Everything downstream only looks at `ApiFailure`.

use std::time::Duration;
use thiserror::Error;

/// Retry-after used when the platform rate-limits without saying how long.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Raw failure as reported by the Platform Client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("platform error {code}: {description}")]
pub struct ApiError {
    pub code: u16,
    pub description: String,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(code: u16, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            retry_after_secs: None,
        }
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            code: 429,
            description: "Too Many Requests".to_string(),
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// The fixed failure taxonomy every action outcome collapses into.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiFailure {
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// The target is already in the requested state (e.g. message already gone).
    #[error("already satisfied: {0}")]
    AlreadySatisfied(String),

    #[error("unknown platform error: {0}")]
    Unknown(String),
}

/// Translate a raw platform error into the taxonomy.
pub fn classify(err: &ApiError) -> ApiFailure {
    let description = err.description.to_ascii_lowercase();

    match err.code {
        429 => ApiFailure::RateLimited(
            err.retry_after_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER),
        ),
        401 | 403 => ApiFailure::PermissionDenied(err.description.clone()),
        404 => ApiFailure::AlreadySatisfied(err.description.clone()),
        400 if description.contains("not found") || description.contains("unknown message") => {
            ApiFailure::AlreadySatisfied(err.description.clone())
        }
        400 if description.contains("not enough rights")
            || description.contains("missing permissions")
            || description.contains("administrator") =>
        {
            ApiFailure::PermissionDenied(err.description.clone())
        }
        400 => ApiFailure::BadRequest(err.description.clone()),
        _ => ApiFailure::Unknown(err.to_string()),
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    StorageError(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },

    #[error("Invalid scam pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Internal orchestrator errors. Never escapes a public entry point.
#[derive(Debug, Error)]
pub enum ModerationError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
