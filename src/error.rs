// src/error.rs
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("venue returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to decode venue response: {0}")]
    Decode(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Decode(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("invalid session time '{0}', expected HH:MM")]
    SessionTime(String),

    #[error("invalid UTC offset of {0} minutes")]
    UtcOffset(i32),

    #[error("unsupported timeframe '{0}'")]
    Timeframe(String),

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: String },
}

/// Terminal outcome of an outbound call whose retry budget ran out.
///
/// The driver loop reacts by flattening everything reachable and halting.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempts: {last_error}")]
pub struct Emergency {
    pub operation: &'static str,
    pub attempts: u32,
    #[source]
    pub last_error: GatewayError,
}
