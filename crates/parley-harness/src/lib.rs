//! Conformance harness for engines that speak a line-oriented protocol.
//!
//! Suites register ordered test cases, drive a live engine process through
//! [`Expect`], and are executed by a [`SuiteRunner`] that isolates each
//! suite in its own temporary directory and scans the engine's output for
//! sanitizer and valgrind reports after every test.
//!
//! # Overview
//!
//! - [`Expect`]: equals / starts-with / contains / wildcard / callback matchers
//! - [`WildcardPattern`]: `*` patterns that may span line breaks
//! - [`DiagnosticScanner`]: detects analysis-tool reports in retained output
//! - [`TestSuite`] and [`TestCase`]: ordered, explicitly registered tests
//! - [`SuiteRunner`]: lifecycle hooks, temp-dir isolation, aggregation
//! - [`EngineTarget`]: how to launch the engine under test
//! - [`HarnessError`]: every way a test can fail
//!
//! # Example
//!
//! ```no_run
//! use parley_harness::{EngineTarget, Expect};
//! use parley_types::HarnessConfig;
//!
//! # fn example() -> Result<(), parley_harness::HarnessError> {
//! let config = HarnessConfig::default();
//! let target = EngineTarget::new("./engine");
//! let mut session = target.interactive(std::path::Path::new("."), &config)?;
//! session.send_command("uci")?;
//! Expect::new(&mut session).equals("uciok")?;
//! # Ok(())
//! # }
//! ```

pub mod diagnostics;
pub mod error;
pub mod expect;
pub mod fixtures;
pub mod report;
pub mod runner;
pub mod suite;
pub mod target;
pub mod wildcard;

pub use diagnostics::{DiagnosticHit, DiagnosticScanner};
pub use error::{FailureKind, HarnessError};
pub use expect::{Expect, Expectation, DEFAULT_TIMEOUT};
pub use fixtures::{require_tablebase_dir, BenchEpd, TablebaseDir, TsanSuppressions};
pub use report::{
    ConsoleReporter, Reporter, RunReport, SilentReporter, SuiteReport, TestFailure, TestOutcome,
    TestStatus,
};
pub use runner::SuiteRunner;
pub use suite::{SuiteContext, SuiteKind, TestCase, TestSuite};
pub use target::{require_success, EngineTarget};
pub use wildcard::WildcardPattern;
