//! Integration tests running whole suites against the scripted engine.

mod common;

use parley_harness::report::SilentReporter;
use parley_harness::target::require_success;
use parley_harness::{
    EngineTarget, FailureKind, HarnessError, SuiteContext, SuiteKind, SuiteRunner, TestCase,
    TestSuite,
};
use parley_pilot::ProcessSession;

use common::{mock_target, quick_config};

// ---------------------------------------------------------------------------
// Suites
// ---------------------------------------------------------------------------

/// One engine for the whole suite, like a UCI GUI session.
#[derive(Default)]
struct Conversation {
    engine: Option<ProcessSession>,
}

impl Conversation {
    fn engine(&mut self) -> Result<&mut ProcessSession, HarnessError> {
        self.engine
            .as_mut()
            .ok_or_else(|| HarnessError::Other("engine not started".into()))
    }
}

impl TestSuite for Conversation {
    const NAME: &'static str = "conversation";
    const KIND: SuiteKind = SuiteKind::Stateful;

    fn cases() -> Vec<TestCase<Self>> {
        vec![
            TestCase::new("startup_output", |s, ctx| {
                ctx.expect(s.engine()?).starts_with("Alexander")?;
                Ok(())
            }),
            TestCase::new("uci_command", |s, ctx| {
                ctx.expect(s.engine()?).send("uci")?.equals("uciok")?;
                Ok(())
            }),
            TestCase::new("set_threads_option", |s, ctx| {
                let threads = ctx.target().threads();
                s.engine()?
                    .send_command(&format!("setoption name Threads value {threads}"))?;
                Ok(())
            }),
            TestCase::new("search_reports_data_race", |s, ctx| {
                let engine = s.engine()?;
                engine.send_command("tsan")?;
                ctx.expect(engine).send("go depth 3")?.starts_with("bestmove")?;
                Ok(())
            }),
            TestCase::new("history_is_clean_again", |s, ctx| {
                ctx.expect(s.engine()?)
                    .send("go depth 2")?
                    .wildcard("* score cp 20 * pv e2e4")?
                    .starts_with("bestmove")?;
                Ok(())
            }),
        ]
    }

    fn before_all(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        self.engine = Some(ctx.interactive()?);
        Ok(())
    }

    fn after_all(&mut self, _ctx: &SuiteContext) -> Result<(), HarnessError> {
        let engine = self.engine()?;
        engine.quit()?;
        let code = engine.close()?;
        parley_harness::ensure!(code == 0, "engine exited with {code}");
        Ok(())
    }

    fn session(&mut self) -> Option<&mut ProcessSession> {
        self.engine.as_mut()
    }
}

/// One-shot invocations, each parked for the diagnostic scan.
#[derive(Default)]
struct CommandLine {
    last: Option<ProcessSession>,
}

impl CommandLine {
    fn run(&mut self, ctx: &SuiteContext, args: &[&str]) -> Result<(), HarnessError> {
        let session = ctx.one_shot(args)?;
        let result = require_success(&session);
        self.last = Some(session);
        result
    }
}

impl TestSuite for CommandLine {
    const NAME: &'static str = "command_line";
    const KIND: SuiteKind = SuiteKind::Stateless;

    fn cases() -> Vec<TestCase<Self>> {
        vec![
            TestCase::new("go_depth_5", |s, ctx| s.run(ctx, &["go", "depth", "5"])),
            TestCase::new("ubsan_report", |s, ctx| s.run(ctx, &["ubsan"])),
            TestCase::new("exit_code", |s, ctx| s.run(ctx, &["exit", "3"])),
            TestCase::new("export_net", |s, ctx| {
                s.run(ctx, &["export_net", "verify.nnue"])?;
                parley_harness::ensure!(
                    ctx.workdir().join("verify.nnue").is_file(),
                    "network not written to the suite directory"
                );
                Ok(())
            }),
        ]
    }

    fn session(&mut self) -> Option<&mut ProcessSession> {
        self.last.as_mut()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

fn failure_kinds(report: &parley_harness::SuiteReport) -> Vec<Option<FailureKind>> {
    report
        .tests
        .iter()
        .map(|t| t.failure.as_ref().map(|f| f.kind))
        .collect()
}

#[test]
fn stateful_suite_flags_only_the_racy_test() {
    let mut runner = SuiteRunner::new(mock_target(), quick_config());
    runner.register::<Conversation>();
    let report = runner.run(&mut SilentReporter);

    let suite = &report.suites[0];
    assert_eq!(
        failure_kinds(suite),
        vec![None, None, None, Some(FailureKind::Diagnostic), None]
    );
    assert!(suite.teardown_failure.is_none(), "{:?}", suite.teardown_failure);
    assert!(report.has_failed());
}

#[test]
fn stateless_suite_checks_exit_codes_and_diagnostics() {
    let mut runner = SuiteRunner::new(mock_target(), quick_config());
    runner.register::<CommandLine>();
    let report = runner.run(&mut SilentReporter);

    assert_eq!(
        failure_kinds(&report.suites[0]),
        vec![
            None,
            Some(FailureKind::Diagnostic),
            Some(FailureKind::ExitCode),
            None
        ]
    );
}

#[test]
fn suites_run_in_registration_order_and_filter() {
    let mut runner = SuiteRunner::new(mock_target(), quick_config());
    runner
        .register::<CommandLine>()
        .register::<Conversation>()
        .only(["conversation"]);
    assert_eq!(runner.suite_names(), vec!["command_line", "conversation"]);

    let report = runner.run(&mut SilentReporter);
    let names: Vec<_> = report.suites.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["conversation"]);
}

#[test]
fn missing_engine_fails_every_stateful_test() {
    let mut runner = SuiteRunner::new(EngineTarget::new("/nonexistent/engine"), quick_config());
    runner.register::<Conversation>();
    let report = runner.run(&mut SilentReporter);

    let suite = &report.suites[0];
    assert!(suite.setup_failure.is_some());
    assert_eq!(suite.tests.len(), Conversation::cases().len());
    assert!(suite.tests.iter().all(|t| !t.passed()));
    // after_all still ran and found no engine.
    assert!(suite.teardown_failure.is_some());
}

#[test]
fn json_report_round_trips_through_serde_json() {
    let mut runner = SuiteRunner::new(mock_target(), quick_config());
    runner.register::<CommandLine>();
    let report = runner.run(&mut SilentReporter);

    let json = report.to_json().expect("serialize");
    let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
    assert_eq!(value["suites"][0]["name"], "command_line");
    assert_eq!(value["suites"][0]["kind"], "stateless");
    assert_eq!(value["suites"][0]["tests"][2]["failure"]["kind"], "exit-code");
}
