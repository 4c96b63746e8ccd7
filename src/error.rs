use std::time::Duration;
use thiserror::Error;

/// A rejected request to a signal controller. The controller's state is unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown phase `{0}`")]
    UnknownPhase(String),

    #[error("invalid green duration {0}")]
    InvalidDuration(f64),
}

/// A failure to obtain usable advice from the advisory service.
///
/// None of these are fatal: the timing advisor falls back to its own heuristic.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdvisoryError {
    /// The service is not configured or cannot be used; disables it for the rest of the run.
    #[error("advisory service unavailable: {0}")]
    Configuration(String),

    #[error("advisory request failed: {0}")]
    Transport(String),

    #[error("advisory service did not answer within {0:?}")]
    Timeout(Duration),

    #[error("malformed advisory response: {0}")]
    MalformedResponse(String),
}

/// A configuration that cannot be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("`{field}` must be {rule}, got {value}")]
    OutOfRange {
        field: &'static str,
        rule: &'static str,
        value: f64,
    },
}
