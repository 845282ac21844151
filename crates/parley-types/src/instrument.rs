//! Instrumentation modes for the engine under test.
//!
//! A mode decides which wrapper command (if any) is prepended to the engine
//! invocation and how many search threads the suites should request.

use std::fmt;

use serde::{Deserialize, Serialize};

const VALGRIND: &str = "valgrind";

/// How the engine binary is instrumented for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Instrumentation {
    /// Plain binary, no wrapper.
    #[default]
    None,
    /// Memcheck under valgrind, leaks reported as errors.
    Valgrind,
    /// Valgrind with fair scheduling for multi-threaded searches.
    ValgrindThread,
    /// Binary built with the undefined-behavior sanitizer.
    SanitizerUndefined,
    /// Binary built with the thread sanitizer.
    SanitizerThread,
}

impl Instrumentation {
    /// Tokens prepended to `[engine, args...]` when spawning.
    pub fn prefix(self) -> Vec<String> {
        let tokens: &[&str] = match self {
            Self::Valgrind => &[
                VALGRIND,
                "--error-exitcode=42",
                "--errors-for-leak-kinds=all",
                "--leak-check=full",
            ],
            Self::ValgrindThread => &[VALGRIND, "--error-exitcode=42", "--fair-sched=try"],
            Self::None | Self::SanitizerUndefined | Self::SanitizerThread => &[],
        };
        tokens.iter().map(|t| (*t).to_string()).collect()
    }

    /// Search thread count the suites should configure.
    ///
    /// Thread-checking modes need at least two workers to exercise the
    /// shared state they are meant to catch races in.
    pub fn threads(self) -> usize {
        match self {
            Self::ValgrindThread | Self::SanitizerThread => 2,
            _ => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Valgrind => "valgrind",
            Self::ValgrindThread => "valgrind-thread",
            Self::SanitizerUndefined => "sanitizer-undefined",
            Self::SanitizerThread => "sanitizer-thread",
        }
    }
}

impl fmt::Display for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_modes_have_no_prefix() {
        assert!(Instrumentation::None.prefix().is_empty());
        assert!(Instrumentation::SanitizerUndefined.prefix().is_empty());
        assert!(Instrumentation::SanitizerThread.prefix().is_empty());
    }

    #[test]
    fn valgrind_prefix_sets_error_exit_code() {
        let prefix = Instrumentation::Valgrind.prefix();
        assert_eq!(prefix[0], "valgrind");
        assert!(prefix.contains(&"--error-exitcode=42".to_string()));
        assert!(prefix.contains(&"--leak-check=full".to_string()));

        let prefix = Instrumentation::ValgrindThread.prefix();
        assert_eq!(prefix.last().map(String::as_str), Some("--fair-sched=try"));
    }

    #[test]
    fn thread_modes_request_two_workers() {
        assert_eq!(Instrumentation::None.threads(), 1);
        assert_eq!(Instrumentation::Valgrind.threads(), 1);
        assert_eq!(Instrumentation::ValgrindThread.threads(), 2);
        assert_eq!(Instrumentation::SanitizerThread.threads(), 2);
    }

    #[test]
    fn label_matches_cli_flag_spelling() {
        assert_eq!(Instrumentation::SanitizerThread.to_string(), "sanitizer-thread");
        assert_eq!(Instrumentation::default(), Instrumentation::None);
    }
}
