//! Error types for the harness crate.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use parley_types::ParleyError;

/// Everything that can fail a test case.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The response unit ended without the expected line.
    #[error("expected {expected}, got {actual:?}")]
    Mismatch {
        /// Description of the expectation.
        expected: String,
        /// The terminal line (or content) actually observed.
        actual: String,
    },
    /// A matcher waited longer than its timeout.
    #[error("timed out after {waited:?} waiting for {expected} (last line: {last_line:?})")]
    Timeout {
        expected: String,
        waited: Duration,
        /// The last line read before giving up, if any.
        last_line: Option<String>,
    },
    /// The engine exited or its input closed.
    #[error("session closed: {detail}{}", exit_suffix(.exit_code))]
    SessionClosed {
        detail: String,
        exit_code: Option<i32>,
    },
    /// An analysis tool reported a defect in the engine's output.
    ///
    /// The message names the marker only; reporters print `context`.
    #[error("{marker:?} reported at output line {line}")]
    Diagnostic {
        marker: String,
        /// Zero-based index of the hit within the retained history.
        line: usize,
        /// The hit and the lines following it.
        context: Vec<String>,
    },
    /// A one-shot invocation or a closed session ended with a non-zero code.
    #[error("`{command}` exited with code {code}")]
    NonZeroExit { command: String, code: i32 },
    /// A fixture file or directory the suites depend on is missing.
    #[error("fixture unavailable: {} ({reason})", .path.display())]
    FixtureUnavailable { path: PathBuf, reason: String },
    /// A free-form assertion inside a test body or callback failed.
    #[error("assertion failed: {0}")]
    AssertionFailed(String),
    /// The test body panicked.
    #[error("panicked: {0}")]
    Panicked(String),
    /// An error from the process layer.
    #[error("process error: {0}")]
    Session(ParleyError),
    /// An invalid regex or wildcard pattern was provided.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

fn exit_suffix(code: &Option<i32>) -> String {
    code.map(|c| format!(" (exit code {c})")).unwrap_or_default()
}

impl From<ParleyError> for HarnessError {
    fn from(err: ParleyError) -> Self {
        match err {
            ParleyError::SessionClosed(detail) => HarnessError::SessionClosed {
                detail,
                exit_code: None,
            },
            other => HarnessError::Session(other),
        }
    }
}

/// Coarse failure category used in summaries and JSON reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Mismatch,
    Timeout,
    Crash,
    Diagnostic,
    ExitCode,
    Fixture,
    Assertion,
    Internal,
}

impl HarnessError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Mismatch { .. } => FailureKind::Mismatch,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::SessionClosed { .. } => FailureKind::Crash,
            Self::Diagnostic { .. } => FailureKind::Diagnostic,
            Self::NonZeroExit { .. } => FailureKind::ExitCode,
            Self::FixtureUnavailable { .. } => FailureKind::Fixture,
            Self::AssertionFailed(_) | Self::Panicked(_) => FailureKind::Assertion,
            Self::Session(_) | Self::Regex(_) | Self::Io(_) | Self::Other(_) => {
                FailureKind::Internal
            }
        }
    }

    /// Shorthand for [`HarnessError::AssertionFailed`].
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionFailed(message.into())
    }
}

/// Fail with an [`HarnessError::AssertionFailed`] unless `cond` holds.
///
/// ```
/// # use parley_harness::{ensure, HarnessError};
/// fn check(depth: u32) -> Result<(), HarnessError> {
///     ensure!(depth == 10, "search stopped at depth {depth}");
///     Ok(())
/// }
/// assert!(check(9).is_err());
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::HarnessError::AssertionFailed(format!($($arg)+)));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_closed_maps_from_process_layer() {
        let err: HarnessError = ParleyError::SessionClosed("stdin is closed".into()).into();
        assert_eq!(err.kind(), FailureKind::Crash);
        assert_eq!(err.to_string(), "session closed: stdin is closed");

        let err: HarnessError = ParleyError::SpawnError("no such file".into()).into();
        assert_eq!(err.kind(), FailureKind::Internal);
    }

    #[test]
    fn session_closed_mentions_exit_code() {
        let err = HarnessError::SessionClosed {
            detail: "output ended".into(),
            exit_code: Some(-11),
        };
        assert!(err.to_string().ends_with("(exit code -11)"));
    }

    #[test]
    fn diagnostic_display_names_marker_and_line() {
        let err = HarnessError::Diagnostic {
            marker: "WARNING: ThreadSanitizer:".into(),
            line: 3,
            context: vec![
                "WARNING: ThreadSanitizer: data race".into(),
                "  Write of size 8".into(),
            ],
        };
        let text = err.to_string();
        assert_eq!(text, "\"WARNING: ThreadSanitizer:\" reported at output line 3");
        assert!(!text.contains("Write of size 8"));
    }

    #[test]
    fn ensure_macro_returns_assertion_failure() {
        fn body(ok: bool) -> Result<(), HarnessError> {
            ensure!(ok, "flag was {ok}");
            Ok(())
        }
        assert!(body(true).is_ok());
        match body(false) {
            Err(HarnessError::AssertionFailed(msg)) => assert_eq!(msg, "flag was false"),
            other => panic!("expected AssertionFailed, got {other:?}"),
        }
    }
}
