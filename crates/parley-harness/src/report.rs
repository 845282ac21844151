//! Test outcomes, per-suite and per-run aggregation, and progress output.

use std::io::{self, Write};
use std::time::Duration;

use crossterm::style::Stylize;
use serde::{Serialize, Serializer};

use crate::error::{FailureKind, HarnessError};
use crate::suite::SuiteKind;

/// Final state of a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestStatus {
    Passed,
    Failed,
}

/// Why a test, or a suite hook, failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Diagnostic context lines, when the failure came from the scanner.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl From<&HarnessError> for TestFailure {
    fn from(err: &HarnessError) -> Self {
        let context = match err {
            HarnessError::Diagnostic { context, .. } => context.clone(),
            _ => Vec::new(),
        };
        Self {
            kind: err.kind(),
            message: err.to_string(),
            context,
        }
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    pub name: String,
    pub status: TestStatus,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TestFailure>,
}

impl TestOutcome {
    pub fn from_result(name: &str, duration: Duration, result: Result<(), HarnessError>) -> Self {
        let failure = result.err().map(|e| TestFailure::from(&e));
        Self {
            name: name.to_string(),
            status: if failure.is_some() {
                TestStatus::Failed
            } else {
                TestStatus::Passed
            },
            duration,
            failure,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub name: String,
    pub kind: SuiteKind,
    pub tests: Vec<TestOutcome>,
    /// `before_all` failure; every test of the suite is failed with it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_failure: Option<TestFailure>,
    /// `after_all` failure, or a diagnostic found in the final output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_failure: Option<TestFailure>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

impl SuiteReport {
    pub fn has_failed(&self) -> bool {
        self.setup_failure.is_some()
            || self.teardown_failure.is_some()
            || self.tests.iter().any(|t| !t.passed())
    }

    pub fn passed_count(&self) -> usize {
        self.tests.iter().filter(|t| t.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.tests.len() - self.passed_count()
    }
}

/// Results of a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub suites: Vec<SuiteReport>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

impl RunReport {
    /// Whether anything failed; decides the process exit status.
    pub fn has_failed(&self) -> bool {
        self.suites.iter().any(SuiteReport::has_failed)
    }

    pub fn tests_passed(&self) -> usize {
        self.suites.iter().map(SuiteReport::passed_count).sum()
    }

    pub fn tests_failed(&self) -> usize {
        self.suites.iter().map(SuiteReport::failed_count).sum()
    }

    pub fn tests_total(&self) -> usize {
        self.suites.iter().map(|s| s.tests.len()).sum()
    }

    pub fn suites_failed(&self) -> usize {
        self.suites.iter().filter(|s| s.has_failed()).count()
    }

    /// Every failed test as `(suite, outcome)`.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &TestOutcome)> {
        self.suites.iter().flat_map(|suite| {
            suite
                .tests
                .iter()
                .filter(|t| !t.passed())
                .map(move |t| (suite.name.as_str(), t))
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Receives progress events from the runner.
pub trait Reporter {
    fn suite_started(&mut self, _suite: &str, _tests: usize) {}
    fn test_finished(&mut self, _suite: &str, _outcome: &TestOutcome) {}
    fn suite_finished(&mut self, _report: &SuiteReport) {}
    fn run_finished(&mut self, _report: &RunReport) {}
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct SilentReporter;

impl Reporter for SilentReporter {}

/// Human-readable progress on a writer, colored when asked to.
pub struct ConsoleReporter<W: Write = io::Stdout> {
    out: W,
    color: bool,
}

impl ConsoleReporter<io::Stdout> {
    /// Report to stdout, colored when stdout is a terminal.
    pub fn stdout() -> Self {
        use crossterm::tty::IsTty;
        let out = io::stdout();
        let color = out.is_tty();
        Self { out, color }
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, text: &str, passed: bool) -> String {
        match (self.color, passed) {
            (false, _) => text.to_string(),
            (true, true) => text.to_string().green().to_string(),
            (true, false) => text.to_string().red().bold().to_string(),
        }
    }

    fn write_failure(&mut self, failure: &TestFailure) -> io::Result<()> {
        writeln!(self.out, "    {}: {}", kind_label(failure.kind), failure.message)?;
        if failure.kind != FailureKind::Diagnostic {
            return Ok(());
        }
        for line in &failure.context {
            writeln!(self.out, "    | {line}")?;
        }
        Ok(())
    }

    fn try_test_finished(&mut self, suite: &str, outcome: &TestOutcome) -> io::Result<()> {
        let label = self.paint(if outcome.passed() { "PASS" } else { "FAIL" }, outcome.passed());
        writeln!(
            self.out,
            "  {label} {suite}::{} ({:.2}s)",
            outcome.name,
            outcome.duration.as_secs_f64()
        )?;
        if let Some(failure) = &outcome.failure {
            self.write_failure(failure)?;
        }
        Ok(())
    }

    fn try_suite_finished(&mut self, report: &SuiteReport) -> io::Result<()> {
        if let Some(failure) = &report.setup_failure {
            writeln!(self.out, "  {} setup failed", report.name)?;
            self.write_failure(failure)?;
        }
        if let Some(failure) = &report.teardown_failure {
            let label = self.paint("FAIL", false);
            writeln!(self.out, "  {label} {} teardown", report.name)?;
            self.write_failure(failure)?;
        }
        Ok(())
    }

    fn try_run_finished(&mut self, report: &RunReport) -> io::Result<()> {
        let suites = report.suites.len();
        let suites_failed = report.suites_failed();
        writeln!(self.out)?;
        writeln!(
            self.out,
            "Suites: {} passed, {} failed, {suites} total",
            suites - suites_failed,
            suites_failed
        )?;
        writeln!(
            self.out,
            "Tests:  {} passed, {} failed, {} total",
            report.tests_passed(),
            report.tests_failed(),
            report.tests_total()
        )?;
        writeln!(self.out, "Time:   {:.2}s", report.duration.as_secs_f64())?;

        let failures: Vec<_> = report.failures().collect();
        if !failures.is_empty() {
            writeln!(self.out)?;
            writeln!(self.out, "Failed tests:")?;
            for (suite, outcome) in failures {
                let kind = outcome.failure.as_ref().map_or("unknown", |f| kind_label(f.kind));
                writeln!(self.out, "  {suite}::{} [{kind}]", outcome.name)?;
            }
        }
        let verdict = if report.has_failed() { "FAILED" } else { "OK" };
        writeln!(self.out, "{}", self.paint(verdict, !report.has_failed()))?;
        self.out.flush()
    }
}

fn kind_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Mismatch => "mismatch",
        FailureKind::Timeout => "timeout",
        FailureKind::Crash => "session closed",
        FailureKind::Diagnostic => "diagnostic",
        FailureKind::ExitCode => "exit code",
        FailureKind::Fixture => "fixture",
        FailureKind::Assertion => "assertion",
        FailureKind::Internal => "internal",
    }
}

// Progress output is best effort: a closed stdout must not abort the run.
impl<W: Write> Reporter for ConsoleReporter<W> {
    fn suite_started(&mut self, suite: &str, tests: usize) {
        let _ = writeln!(self.out, "{suite} ({tests} tests)");
    }

    fn test_finished(&mut self, suite: &str, outcome: &TestOutcome) {
        let _ = self.try_test_finished(suite, outcome);
    }

    fn suite_finished(&mut self, report: &SuiteReport) {
        let _ = self.try_suite_finished(report);
    }

    fn run_finished(&mut self, report: &RunReport) {
        let _ = self.try_run_finished(report);
    }
}
