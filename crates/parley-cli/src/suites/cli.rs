//! One-shot invocations: every test runs the engine with a command on its
//! argument list and requires exit code 0.

use std::fs;

use parley_harness::{
    ensure, require_success, HarnessError, SuiteContext, SuiteKind, TestCase, TestSuite,
};
use parley_pilot::ProcessSession;

use super::{SuiteSettings, EXPORTED_NETWORK};

const EVAL_FILE_OPTION: &str = "option name EvalFile type string default ";

pub struct CliSuite {
    settings: SuiteSettings,
    /// Latest invocation, kept for the diagnostic scan.
    last: Option<ProcessSession>,
}

impl CliSuite {
    pub fn new(settings: SuiteSettings) -> Self {
        Self {
            settings,
            last: None,
        }
    }

    fn run(&mut self, ctx: &SuiteContext, args: &[&str]) -> Result<&ProcessSession, HarnessError> {
        let session = self.last.insert(ctx.one_shot(args)?);
        require_success(session)?;
        Ok(session)
    }

    fn run_line(&mut self, ctx: &SuiteContext, line: &str) -> Result<(), HarnessError> {
        let args: Vec<&str> = line.split_whitespace().collect();
        self.run(ctx, &args).map(|_| ())
    }

    fn bench_default(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let threads = ctx.target().threads();
        self.run_line(ctx, &format!("bench 128 {threads} 8 default depth"))
    }

    fn bench_epd(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let threads = ctx.target().threads().to_string();
        let epd = self.settings.bench_epd.to_string_lossy().into_owned();
        self.run(ctx, &["bench", "128", &threads, "3", &epd, "depth"])
            .map(|_| ())
    }

    fn export_net(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let target = ctx.workdir().join(EXPORTED_NETWORK);
        let target = target.to_string_lossy().into_owned();
        self.run(ctx, &["export_net", &target]).map(|_| ())
    }

    /// The exported network must be byte-identical to the default one.
    fn network_equals_base(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        let output = self.run(ctx, &["uci"])?.output();
        let network = output
            .iter()
            .find_map(|line| line.trim_end().strip_prefix(EVAL_FILE_OPTION))
            .ok_or_else(|| HarnessError::assertion("engine reports no default EvalFile"))?
            .to_string();

        let base_path = self.settings.network_dir.join(&network);
        let base = fs::read(&base_path).map_err(|e| HarnessError::FixtureUnavailable {
            path: base_path.clone(),
            reason: format!("default network not readable: {e}"),
        })?;
        let exported = fs::read(ctx.workdir().join(EXPORTED_NETWORK))?;
        ensure!(
            base == exported,
            "{EXPORTED_NETWORK} ({} bytes) differs from {} ({} bytes)",
            exported.len(),
            base_path.display(),
            base.len()
        );
        Ok(())
    }
}

impl TestSuite for CliSuite {
    const NAME: &'static str = "cli";
    const KIND: SuiteKind = SuiteKind::Stateless;

    fn cases() -> Vec<TestCase<Self>> {
        vec![
            TestCase::new("eval", |s, ctx| s.run_line(ctx, "eval")),
            TestCase::new("go_nodes_1000", |s, ctx| s.run_line(ctx, "go nodes 1000")),
            TestCase::new("go_depth_10", |s, ctx| s.run_line(ctx, "go depth 10")),
            TestCase::new("go_perft_4", |s, ctx| s.run_line(ctx, "go perft 4")),
            TestCase::new("go_movetime_1000", |s, ctx| s.run_line(ctx, "go movetime 1000")),
            TestCase::new("go_wtime_8000_btime_8000_winc_500_binc_500", |s, ctx| {
                s.run_line(ctx, "go wtime 8000 btime 8000 winc 500 binc 500")
            }),
            TestCase::new("go_wtime_1000_btime_1000_winc_0_binc_0", |s, ctx| {
                s.run_line(ctx, "go wtime 1000 btime 1000 winc 0 binc 0")
            }),
            TestCase::new("go_wtime_1000_btime_1000_winc_0_binc_0_movestogo_5", |s, ctx| {
                s.run_line(ctx, "go wtime 1000 btime 1000 winc 0 binc 0 movestogo 5")
            }),
            TestCase::new("go_movetime_200", |s, ctx| s.run_line(ctx, "go movetime 200")),
            TestCase::new("go_nodes_20000_searchmoves_e2e4_d2d4", |s, ctx| {
                s.run_line(ctx, "go nodes 20000 searchmoves e2e4 d2d4")
            }),
            TestCase::new("bench_128_threads_8_default_depth", Self::bench_default),
            TestCase::new("bench_128_threads_3_bench_tmp_epd_depth", Self::bench_epd),
            TestCase::new("d", |s, ctx| s.run_line(ctx, "d")),
            TestCase::new("compiler", |s, ctx| s.run_line(ctx, "compiler")),
            TestCase::new("license", |s, ctx| s.run_line(ctx, "license")),
            TestCase::new("uci", |s, ctx| s.run_line(ctx, "uci")),
            TestCase::new("export_net_verify_nnue", Self::export_net),
            TestCase::new("network_equals_base", Self::network_equals_base),
        ]
    }

    fn session(&mut self) -> Option<&mut ProcessSession> {
        self.last.as_mut()
    }
}
