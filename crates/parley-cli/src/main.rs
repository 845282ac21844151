mod suites;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser};
use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_harness::{
    require_tablebase_dir, BenchEpd, ConsoleReporter, EngineTarget, SuiteRunner, TestSuite,
    TsanSuppressions,
};
use parley_types::{HarnessConfig, Instrumentation};

use suites::{CliSuite, InteractiveSuite, SuiteSettings, TablebaseSuite, SUITE_NAMES};

/// Parley -- conformance tests for UCI chess engines.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
#[command(group(
    ArgGroup::new("mode")
        .args(["none", "valgrind", "valgrind_thread", "sanitizer_undefined", "sanitizer_thread"])
))]
struct Cli {
    /// Run the engine without instrumentation (default)
    #[arg(long)]
    none: bool,

    /// Run the engine under valgrind memcheck
    #[arg(long)]
    valgrind: bool,

    /// Run the engine under valgrind with fair scheduling and two threads
    #[arg(long)]
    valgrind_thread: bool,

    /// The engine is built with the undefined-behavior sanitizer
    #[arg(long)]
    sanitizer_undefined: bool,

    /// The engine is built with the thread sanitizer; searches use two threads
    #[arg(long)]
    sanitizer_thread: bool,

    /// Path to the engine binary
    engine_path: PathBuf,

    /// TOML file with timeouts, terminators and diagnostic markers
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for generated fixtures; tablebases are read from its `syzygy/`
    #[arg(long, default_value = ".")]
    fixtures_dir: PathBuf,

    /// Directory holding the engine's default network [default: engine's directory]
    #[arg(long)]
    network_dir: Option<PathBuf>,

    /// Skip the tablebase suite instead of requiring `<fixtures-dir>/syzygy`
    #[arg(long)]
    skip_tablebase: bool,

    /// Only run the named suite (repeatable)
    #[arg(long = "suite", value_name = "NAME")]
    suites: Vec<String>,

    /// Also write the results as JSON to this file
    #[arg(long)]
    report_json: Option<PathBuf>,

    /// Prefix of the engine's startup banner and namespace in sanitizer suppressions
    #[arg(long, default_value = "Alexander")]
    engine_name: String,

    /// Seconds each matcher waits for output (overrides config and environment)
    #[arg(long)]
    match_timeout: Option<u64>,
}

impl Cli {
    fn instrumentation(&self) -> Instrumentation {
        if self.valgrind {
            Instrumentation::Valgrind
        } else if self.valgrind_thread {
            Instrumentation::ValgrindThread
        } else if self.sanitizer_undefined {
            Instrumentation::SanitizerUndefined
        } else if self.sanitizer_thread {
            Instrumentation::SanitizerThread
        } else {
            Instrumentation::None
        }
    }

    fn wants(&self, suite: &str) -> bool {
        self.suites.is_empty() || self.suites.iter().any(|s| s == suite)
    }

    fn load_config(&self) -> anyhow::Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => {
                let mut config = HarnessConfig::default();
                config
                    .apply_env_overrides()
                    .context("invalid PARLEY_* environment override")?;
                config
            }
        };
        if let Some(secs) = self.match_timeout {
            config.match_timeout_secs = secs;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    // Initialize tracing with env filter (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Run the selected suites; `Ok(false)` means at least one test failed.
fn run(cli: &Cli) -> anyhow::Result<bool> {
    if let Some(unknown) = cli.suites.iter().find(|s| !SUITE_NAMES.contains(&s.as_str())) {
        bail!("unknown suite {unknown:?}, expected one of {}", SUITE_NAMES.join(", "));
    }

    let config = cli.load_config()?;
    let engine = cli
        .engine_path
        .canonicalize()
        .with_context(|| format!("engine not found at {}", cli.engine_path.display()))?;
    let fixtures_dir = cli
        .fixtures_dir
        .canonicalize()
        .with_context(|| format!("fixtures directory {} not found", cli.fixtures_dir.display()))?;
    let network_dir = match &cli.network_dir {
        Some(dir) => dir.clone(),
        None => engine_dir(&engine)?,
    };

    let tablebase = if cli.skip_tablebase || !cli.wants(TablebaseSuite::NAME) {
        None
    } else {
        let dir = require_tablebase_dir(&fixtures_dir.join("syzygy"))
            .context("tablebase suite needs syzygy files (use --skip-tablebase to skip it)")?;
        Some(dir)
    };

    // Both fixtures are removed when they drop at the end of the run.
    let bench_epd = BenchEpd::create(&fixtures_dir).context("failed to create bench positions")?;
    let tsan = TsanSuppressions::create(&fixtures_dir, &cli.engine_name)
        .context("failed to create thread-sanitizer suppressions")?;

    let mode = cli.instrumentation();
    let (key, value) = tsan.env_pair();
    let target = EngineTarget::new(engine.clone()).instrumentation(mode).env(key, value);
    info!(engine = %engine.display(), %mode, threads = target.threads(), "starting conformance run");

    let settings = SuiteSettings {
        engine_name: cli.engine_name.clone(),
        bench_epd: bench_epd.path().to_path_buf(),
        network_dir,
        tablebase: tablebase.clone(),
    };

    let mut runner = SuiteRunner::new(target, config);
    {
        let settings = settings.clone();
        runner.register_with(move || CliSuite::new(settings));
    }
    {
        let settings = settings.clone();
        runner.register_with(move || InteractiveSuite::new(settings));
    }
    if tablebase.is_some() {
        runner.register_with(move || TablebaseSuite::new(settings));
    }
    runner.only(cli.suites.iter().cloned());

    let mut reporter = ConsoleReporter::stdout();
    let report = runner.run(&mut reporter);

    if let Some(path) = &cli.report_json {
        let json = report.to_json().context("failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }

    drop(tsan);
    drop(bench_epd);
    Ok(!report.has_failed())
}

fn engine_dir(engine: &Path) -> anyhow::Result<PathBuf> {
    engine
        .parent()
        .map(Path::to_path_buf)
        .with_context(|| format!("{} has no parent directory", engine.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("parley").chain(args.iter().copied()))
    }

    #[test]
    fn mode_flags_select_instrumentation() {
        let cli = parse(&["./engine"]).expect("parse");
        assert_eq!(cli.instrumentation(), Instrumentation::None);

        let cli = parse(&["--sanitizer-thread", "./engine"]).expect("parse");
        assert_eq!(cli.instrumentation(), Instrumentation::SanitizerThread);

        let cli = parse(&["--valgrind-thread", "./engine"]).expect("parse");
        assert_eq!(cli.instrumentation(), Instrumentation::ValgrindThread);
    }

    #[test]
    fn mode_flags_are_exclusive() {
        let err = parse(&["--valgrind", "--sanitizer-thread", "./engine"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn suite_filter_is_repeatable() {
        let cli = parse(&["--suite", "cli", "--suite", "tablebase", "./engine"]).expect("parse");
        assert!(cli.wants("cli"));
        assert!(cli.wants("tablebase"));
        assert!(!cli.wants("interactive"));

        let cli = parse(&["./engine"]).expect("parse");
        assert!(cli.wants("interactive"));
    }

    #[test]
    fn timeout_flag_overrides_config() {
        let cli = parse(&["--match-timeout", "7", "./engine"]).expect("parse");
        assert_eq!(cli.load_config().expect("config").match_timeout_secs, 7);

        let cli = parse(&["--match-timeout", "0", "./engine"]).expect("parse");
        assert!(cli.load_config().is_err());
    }

    #[test]
    fn engine_dir_is_parent() {
        let dir = engine_dir(Path::new("/opt/engine/src/alexander")).expect("parent");
        assert_eq!(dir, PathBuf::from("/opt/engine/src"));
    }
}
