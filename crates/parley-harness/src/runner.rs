//! Ordered execution of registered suites.
//!
//! For every suite the runner creates a private temporary directory, builds
//! the suite, runs `before_all`, then each case in declaration order wrapped
//! in `before_each` / `after_each`, and finally `after_all`. After each test
//! the suite's session output is scanned for diagnostic markers and cleared,
//! whether the body passed or not. Errors and panics become per-test
//! failures; nothing a test does can stop the run.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use parley_types::HarnessConfig;

use crate::diagnostics::DiagnosticScanner;
use crate::error::HarnessError;
use crate::report::{Reporter, RunReport, SuiteReport, TestFailure, TestOutcome};
use crate::suite::{SuiteContext, TestSuite};
use crate::target::EngineTarget;

type SuiteJob<'r> = Box<dyn FnOnce(&SuiteEnv<'_>, &mut dyn Reporter) -> SuiteReport + 'r>;

/// Shared, read-only inputs for every suite in a run.
struct SuiteEnv<'e> {
    config: &'e Arc<HarnessConfig>,
    target: &'e Arc<EngineTarget>,
    scanner: &'e DiagnosticScanner,
}

struct Registration<'r> {
    name: &'static str,
    job: SuiteJob<'r>,
}

/// Runs registered suites in registration order.
pub struct SuiteRunner<'r> {
    config: Arc<HarnessConfig>,
    target: Arc<EngineTarget>,
    scanner: DiagnosticScanner,
    suites: Vec<Registration<'r>>,
    only: Vec<String>,
}

impl<'r> SuiteRunner<'r> {
    pub fn new(target: EngineTarget, config: HarnessConfig) -> Self {
        Self {
            scanner: DiagnosticScanner::from_config(&config),
            config: Arc::new(config),
            target: Arc::new(target),
            suites: Vec::new(),
            only: Vec::new(),
        }
    }

    /// Register a suite built with `Default`.
    pub fn register<S: TestSuite + Default + 'r>(&mut self) -> &mut Self {
        self.register_with(S::default)
    }

    /// Register a suite built by `factory` right before it runs.
    pub fn register_with<S, F>(&mut self, factory: F) -> &mut Self
    where
        S: TestSuite + 'r,
        F: FnOnce() -> S + 'r,
    {
        self.suites.push(Registration {
            name: S::NAME,
            job: Box::new(move |env, reporter| run_suite(factory(), env, reporter)),
        });
        self
    }

    /// Restrict the run to the named suites. An empty list runs everything.
    pub fn only<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = names.into_iter().map(Into::into).collect();
        self
    }

    /// Names of the registered suites, in run order.
    pub fn suite_names(&self) -> Vec<&'static str> {
        self.suites.iter().map(|r| r.name).collect()
    }

    pub fn run(self, reporter: &mut dyn Reporter) -> RunReport {
        let started = Instant::now();
        let env = SuiteEnv {
            config: &self.config,
            target: &self.target,
            scanner: &self.scanner,
        };

        let mut report = RunReport::default();
        for registration in self.suites {
            if !self.only.is_empty() && !self.only.iter().any(|n| n == registration.name) {
                debug!(suite = registration.name, "suite filtered out");
                continue;
            }
            let suite_report = (registration.job)(&env, reporter);
            reporter.suite_finished(&suite_report);
            report.suites.push(suite_report);
        }
        report.duration = started.elapsed();
        info!(
            passed = report.tests_passed(),
            failed = report.tests_failed(),
            elapsed = ?report.duration,
            "run finished"
        );
        reporter.run_finished(&report);
        report
    }
}

fn run_suite<S: TestSuite>(
    mut suite: S,
    env: &SuiteEnv<'_>,
    reporter: &mut dyn Reporter,
) -> SuiteReport {
    let started = Instant::now();
    let cases = S::cases();
    reporter.suite_started(S::NAME, cases.len());
    info!(suite = S::NAME, tests = cases.len(), "suite started");

    let mut report = SuiteReport {
        name: S::NAME.to_string(),
        kind: S::KIND,
        tests: Vec::with_capacity(cases.len()),
        setup_failure: None,
        teardown_failure: None,
        duration: Duration::ZERO,
    };

    let workdir = match tempfile::Builder::new()
        .prefix(&format!("parley-{}-", S::NAME))
        .tempdir()
    {
        Ok(dir) => dir,
        Err(e) => {
            let err = HarnessError::Io(e);
            fail_all(&mut report, &cases, &err, reporter);
            report.setup_failure = Some(TestFailure::from(&err));
            report.duration = started.elapsed();
            return report;
        }
    };
    let ctx = SuiteContext::new(
        S::NAME,
        workdir.path(),
        Arc::clone(env.config),
        Arc::clone(env.target),
    );

    match guarded(|| suite.before_all(&ctx)) {
        Err(err) => {
            warn!(suite = S::NAME, error = %err, "before_all failed");
            fail_all(&mut report, &cases, &err, reporter);
            report.setup_failure = Some(TestFailure::from(&err));
        }
        Ok(()) => {
            for case in &cases {
                let test_started = Instant::now();
                let result = run_case(&mut suite, case.run, &ctx, env.scanner);
                let outcome = TestOutcome::from_result(case.name, test_started.elapsed(), result);
                debug!(suite = S::NAME, test = case.name, passed = outcome.passed(), "test finished");
                reporter.test_finished(S::NAME, &outcome);
                report.tests.push(outcome);
            }
        }
    }

    // after_all runs even when before_all failed; it may hold a half-built session.
    let teardown = guarded(|| suite.after_all(&ctx)).and_then(|()| scan_and_clear(&mut suite, env.scanner));
    if let Err(err) = teardown {
        warn!(suite = S::NAME, error = %err, "suite teardown failed");
        report.teardown_failure = Some(TestFailure::from(&err));
    }
    drop(suite);

    if let Err(e) = workdir.close() {
        warn!(suite = S::NAME, error = %e, "failed to remove suite directory");
    }
    report.duration = started.elapsed();
    info!(
        suite = S::NAME,
        passed = report.passed_count(),
        failed = report.failed_count(),
        "suite finished"
    );
    report
}

/// One test: health check, `before_each`, body, then `after_each` and the
/// diagnostic scan regardless of how the body ended.
///
/// A diagnostic hit outranks the body's own error, which is usually a
/// symptom of the same defect.
fn run_case<S: TestSuite>(
    suite: &mut S,
    body: crate::suite::TestFn<S>,
    ctx: &SuiteContext,
    scanner: &DiagnosticScanner,
) -> Result<(), HarnessError> {
    let result = guarded(|| {
        suite.health_check()?;
        suite.before_each(ctx)?;
        body(&mut *suite, ctx)
    });
    let after = guarded(|| suite.after_each(ctx));
    let scan = scan_and_clear(suite, scanner);

    match (scan, result) {
        (Err(diagnostic), _) => Err(diagnostic),
        (Ok(()), Err(err)) => Err(err),
        (Ok(()), Ok(())) => after,
    }
}

fn scan_and_clear<S: TestSuite>(suite: &mut S, scanner: &DiagnosticScanner) -> Result<(), HarnessError> {
    let Some(session) = suite.session() else {
        return Ok(());
    };
    scanner.check(&session.take_output())
}

fn fail_all<S>(
    report: &mut SuiteReport,
    cases: &[crate::suite::TestCase<S>],
    err: &HarnessError,
    reporter: &mut dyn Reporter,
) {
    for case in cases {
        let outcome = TestOutcome {
            name: case.name.to_string(),
            status: crate::report::TestStatus::Failed,
            duration: Duration::ZERO,
            failure: Some(TestFailure::from(err)),
        };
        reporter.test_finished(&report.name, &outcome);
        report.tests.push(outcome);
    }
}

/// Run `f`, turning a panic into [`HarnessError::Panicked`].
fn guarded<F>(f: F) -> Result<(), HarnessError>
where
    F: FnOnce() -> Result<(), HarnessError>,
{
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(HarnessError::Panicked(panic_message(payload.as_ref())))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::SilentReporter;
    use crate::suite::{SuiteKind, TestCase};
    use parley_pilot::ProcessSession;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Shared log of hook and test invocations.
    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, entry: impl Into<String>) {
        log.lock().expect("log lock poisoned").push(entry.into());
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().expect("log lock poisoned").clone()
    }

    struct Recorder {
        log: Log,
        fail_setup: bool,
        workdir: Option<PathBuf>,
    }

    impl Recorder {
        fn new(log: &Log) -> Self {
            Self {
                log: Arc::clone(log),
                fail_setup: false,
                workdir: None,
            }
        }
    }

    impl TestSuite for Recorder {
        const NAME: &'static str = "recorder";
        const KIND: SuiteKind = SuiteKind::Stateless;

        fn cases() -> Vec<TestCase<Self>> {
            vec![
                TestCase::new("first", |s, _| {
                    record(&s.log, "first");
                    Ok(())
                }),
                TestCase::new("second", |s, _| {
                    record(&s.log, "second");
                    Err(HarnessError::assertion("second fails"))
                }),
                TestCase::new("third", |s, _| {
                    record(&s.log, "third");
                    panic!("third panics");
                }),
                TestCase::new("fourth", |s, ctx| {
                    record(&s.log, "fourth");
                    s.workdir = Some(ctx.workdir().to_path_buf());
                    crate::ensure!(ctx.workdir().is_dir(), "workdir missing");
                    Ok(())
                }),
            ]
        }

        fn before_all(&mut self, _ctx: &SuiteContext) -> Result<(), HarnessError> {
            record(&self.log, "before_all");
            if self.fail_setup {
                return Err(HarnessError::Other("setup broke".into()));
            }
            Ok(())
        }

        fn before_each(&mut self, _ctx: &SuiteContext) -> Result<(), HarnessError> {
            record(&self.log, "before_each");
            Ok(())
        }

        fn after_each(&mut self, _ctx: &SuiteContext) -> Result<(), HarnessError> {
            record(&self.log, "after_each");
            Ok(())
        }

        fn after_all(&mut self, _ctx: &SuiteContext) -> Result<(), HarnessError> {
            record(&self.log, "after_all");
            if let Some(dir) = &self.workdir {
                record(&self.log, format!("workdir:{}", dir.display()));
            }
            Ok(())
        }
    }

    fn runner<'r>() -> SuiteRunner<'r> {
        SuiteRunner::new(EngineTarget::new("/bin/cat"), HarnessConfig::default())
    }

    #[test]
    fn cases_run_in_declaration_order_with_hooks() {
        let log: Log = Arc::default();
        let mut runner = runner();
        runner.register_with(|| Recorder::new(&log));
        let report = runner.run(&mut SilentReporter);

        let suite = &report.suites[0];
        let names: Vec<_> = suite.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third", "fourth"]);
        let passed: Vec<_> = suite.tests.iter().map(|t| t.passed()).collect();
        assert_eq!(passed, vec![true, false, false, true]);

        let log = entries(&log);
        let calls: Vec<_> = log.iter().filter(|e| !e.starts_with("workdir:")).cloned().collect();
        assert_eq!(
            calls,
            vec![
                "before_all", "before_each", "first", "after_each", "before_each", "second",
                "after_each", "before_each", "third", "after_each", "before_each", "fourth",
                "after_each", "after_all",
            ]
        );
        assert!(report.has_failed());
    }

    #[test]
    fn panics_become_failures() {
        let log: Log = Arc::default();
        let mut runner = runner();
        runner.register_with(|| Recorder::new(&log));
        let report = runner.run(&mut SilentReporter);

        let third = &report.suites[0].tests[2];
        let failure = third.failure.as_ref().expect("third should fail");
        assert!(failure.message.contains("third panics"), "got {}", failure.message);
    }

    #[test]
    fn failing_before_all_fails_every_test() {
        let log: Log = Arc::default();
        let mut runner = runner();
        runner.register_with(|| Recorder {
            fail_setup: true,
            ..Recorder::new(&log)
        });
        let report = runner.run(&mut SilentReporter);

        let suite = &report.suites[0];
        assert_eq!(suite.tests.len(), 4);
        assert!(suite.tests.iter().all(|t| !t.passed()));
        assert!(suite.setup_failure.is_some());
        assert_eq!(entries(&log), vec!["before_all", "after_all"]);
    }

    #[test]
    fn suite_directory_is_removed_afterwards() {
        let log: Log = Arc::default();
        let mut runner = runner();
        runner.register_with(|| Recorder::new(&log));
        runner.run(&mut SilentReporter);

        let dir = entries(&log)
            .into_iter()
            .find_map(|e| e.strip_prefix("workdir:").map(PathBuf::from))
            .expect("fourth test should record its workdir");
        assert!(!dir.exists());
    }

    #[test]
    fn filter_skips_other_suites() {
        let log: Log = Arc::default();
        let mut runner = runner();
        runner.register_with(|| Recorder::new(&log)).only(["something-else"]);
        assert_eq!(runner.suite_names(), vec!["recorder"]);
        let report = runner.run(&mut SilentReporter);
        assert!(report.suites.is_empty());
        assert!(entries(&log).is_empty());
    }

    /// Stateful suite around /bin/sh that can be told to print a marker.
    #[derive(Default)]
    struct Shell {
        session: Option<ProcessSession>,
    }

    impl TestSuite for Shell {
        const NAME: &'static str = "shell";
        const KIND: SuiteKind = SuiteKind::Stateful;

        fn cases() -> Vec<TestCase<Self>> {
            vec![
                TestCase::new("clean", |s, _| s.say("readyok")),
                TestCase::new("race", |s, _| {
                    s.say("WARNING: ThreadSanitizer: data race (pid=1)")?;
                    s.say("readyok")
                }),
                TestCase::new("clean_again", |s, _| s.say("readyok")),
                TestCase::new("exit", |s, _| {
                    let session = s.session.as_mut().expect("session");
                    session.send_command("exit 9")?;
                    session.close()?;
                    Ok(())
                }),
                TestCase::new("after_exit", |s, _| s.say("readyok")),
            ]
        }

        fn before_all(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
            self.session = Some(ctx.interactive()?);
            Ok(())
        }

        fn after_all(&mut self, _ctx: &SuiteContext) -> Result<(), HarnessError> {
            if let Some(session) = self.session.as_mut() {
                session.close()?;
            }
            Ok(())
        }

        fn session(&mut self) -> Option<&mut ProcessSession> {
            self.session.as_mut()
        }
    }

    impl Shell {
        fn say(&mut self, text: &str) -> Result<(), HarnessError> {
            let session = self.session.as_mut().expect("session");
            session.send_command(&format!("echo '{text}'"))?;
            crate::Expect::new(session)
                .timeout(Duration::from_secs(5))
                .starts_with(text)?;
            Ok(())
        }
    }

    #[test]
    fn diagnostic_fails_only_the_test_that_produced_it() {
        let mut runner = SuiteRunner::new(EngineTarget::new("/bin/sh"), HarnessConfig::default());
        runner.register::<Shell>();
        let report = runner.run(&mut SilentReporter);

        let tests = &report.suites[0].tests;
        assert!(tests[0].passed());
        let race = tests[1].failure.as_ref().expect("race should fail");
        assert_eq!(race.kind, crate::FailureKind::Diagnostic);
        assert!(tests[2].passed(), "history must be cleared after each test");
    }

    #[test]
    fn dead_session_fails_remaining_tests_fast() {
        let mut runner = SuiteRunner::new(EngineTarget::new("/bin/sh"), HarnessConfig::default());
        runner.register::<Shell>();
        let report = runner.run(&mut SilentReporter);

        let after_exit = &report.suites[0].tests[4];
        let failure = after_exit.failure.as_ref().expect("should fail");
        assert_eq!(failure.kind, crate::FailureKind::Crash);
        assert!(after_exit.duration < Duration::from_secs(1));
    }
}
