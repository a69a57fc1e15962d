use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RondoError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Session pool exhausted: no healthy session after waiting {waited_secs}s")]
    PoolExhausted { waited_secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A required input field is missing or cannot be normalized.
///
/// Never retried: the input itself is wrong, so another attempt cannot help.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is not a day serial: {value:?}")]
    NotASerial { field: &'static str, value: String },

    #[error("day serial {0} is outside the supported calendar range")]
    OutOfRange(i64),
}

/// Failure raised by a step sequence, tagged with the step it happened in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// A step failed (timeout, missing element, unexpected dialog). Retryable.
    #[error("step `{step}` failed: {message}")]
    Step { step: String, message: String },

    /// The session handle died under the step. Not charged to the item.
    #[error("session lost during `{step}`: {message}")]
    Session { step: String, message: String },
}

impl StepError {
    pub fn failed(step: impl Into<String>, message: impl Into<String>) -> Self {
        StepError::Step {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn session_lost(step: impl Into<String>, message: impl Into<String>) -> Self {
        StepError::Session {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn step(&self) -> &str {
        match self {
            StepError::Step { step, .. } | StepError::Session { step, .. } => step,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StepError::Step { message, .. } | StepError::Session { message, .. } => message,
        }
    }

    pub fn is_session_loss(&self) -> bool {
        matches!(self, StepError::Session { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("failed to create session for slot {slot}: {message}")]
    Create { slot: usize, message: String },

    #[error("health probe failed: {0}")]
    Probe(String),

    #[error("failed to close session: {0}")]
    Close(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode ledger entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("ledger writer has shut down")]
    Closed,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("unsupported source format `{0}` (expected .json or .toml)")]
    Format(String),

    #[error("duplicate item identifier `{0}`")]
    Duplicate(String),

    #[error("item #{0} has an empty identifier")]
    EmptyId(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_error_carries_step_as_field() {
        let err = StepError::failed("captcha", "timed out after 7000ms");
        assert_eq!(err.step(), "captcha");
        assert_eq!(err.message(), "timed out after 7000ms");
        assert!(!err.is_session_loss());
        assert_eq!(err.to_string(), "step `captcha` failed: timed out after 7000ms");
    }

    #[test]
    fn session_loss_is_distinguished() {
        let err = StepError::session_lost("navigate", "connection refused");
        assert!(err.is_session_loss());
        assert_eq!(err.step(), "navigate");
        assert_eq!(
            err.to_string(),
            "session lost during `navigate`: connection refused"
        );
    }

    #[test]
    fn pool_exhausted_display() {
        let err = RondoError::PoolExhausted { waited_secs: 300 };
        assert_eq!(
            err.to_string(),
            "Session pool exhausted: no healthy session after waiting 300s"
        );
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RondoError>();
        assert_send_sync::<StepError>();
        assert_send_sync::<LedgerError>();
    }
}
