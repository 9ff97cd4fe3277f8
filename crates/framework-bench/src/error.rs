//! Error types for benchmark runs

use std::time::Duration;
use thiserror::Error;

/// Failures of the browser session itself
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Browser protocol error: {0}")]
    Protocol(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Element reference is stale")]
    StaleElement,

    #[error("Session is closed")]
    Closed,
}

impl From<chromiumoxide::error::CdpError> for SessionError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        SessionError::Protocol(err.to_string())
    }
}

/// Extracted data violates a soundness invariant
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SoundnessError {
    #[error("exactly {expected} click event(s) expected in run window {window}, found {found}")]
    ClickCount {
        window: usize,
        expected: usize,
        found: usize,
    },

    #[error("at least one paint event is expected after the click event in run window {window}")]
    NoPaint { window: usize },

    #[error("soundness check failed. reported duration {duration}ms is less than 0 in run window {window}")]
    NegativeDuration { window: usize, duration: f64 },

    #[error("soundness check failed. reported duration {duration}ms is bigger than the whole run window ({span}ms) in run window {window}")]
    ExceedsWindow {
        window: usize,
        duration: f64,
        span: f64,
    },

    #[error("no gc event recorded in run window {window}")]
    MissingGc { window: usize },

    #[error("soundness check failed. expected {expected} result(s) for {result_kind}, got {actual}")]
    SampleCount {
        result_kind: String,
        expected: usize,
        actual: usize,
    },
}

/// Everything that can end a worker run
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Soundness(#[from] SoundnessError),

    #[error("Timed out after {timeout:?} waiting for {description}")]
    Timeout {
        description: String,
        timeout: Duration,
    },

    #[error("Invalid element path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Audit failed: {0}")]
    Audit(String),

    #[error("Failed to write results: {0}")]
    Results(#[from] std::io::Error),

    #[error("Benchmark {0} is not known")]
    UnknownBenchmark(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RunError {
    /// Whether this error is a breakdown of the browser or process rather
    /// than an invariant violation of completed work
    pub fn is_technical(&self) -> bool {
        !matches!(self, RunError::Soundness(_))
    }
}

pub type Result<T> = std::result::Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soundness_messages_name_the_window() {
        let err = SoundnessError::ClickCount {
            window: 2,
            expected: 1,
            found: 0,
        };
        assert_eq!(
            err.to_string(),
            "exactly 1 click event(s) expected in run window 2, found 0"
        );
    }

    #[test]
    fn test_soundness_is_not_technical() {
        let err = RunError::from(SoundnessError::NoPaint { window: 0 });
        assert!(!err.is_technical());

        let err = RunError::Timeout {
            description: "element //tbody/tr[1]".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(err.is_technical());
        assert!(err.to_string().contains("//tbody/tr[1]"));
    }
}
