//! UCI conformance suites.
//!
//! `cli` runs the engine once per test with the command on its argument
//! list. `interactive` and `tablebase` keep one engine alive for the whole
//! suite and talk to it over stdin, the way a chess GUI does.

mod cli;
mod interactive;
mod tablebase;

use std::path::PathBuf;

use regex::Regex;

use parley_harness::{HarnessError, SuiteContext, TablebaseDir, TestSuite};
use parley_pilot::ProcessSession;

pub use cli::CliSuite;
pub use interactive::InteractiveSuite;
pub use tablebase::TablebaseSuite;

/// Every suite name `--suite` accepts, in run order.
pub const SUITE_NAMES: [&str; 3] = [
    <CliSuite as TestSuite>::NAME,
    <InteractiveSuite as TestSuite>::NAME,
    <TablebaseSuite as TestSuite>::NAME,
];

/// Run-wide inputs the suites are built with.
#[derive(Debug, Clone)]
pub struct SuiteSettings {
    /// Prefix of the engine's startup banner.
    pub engine_name: String,
    /// Generated benchmark position file.
    pub bench_epd: PathBuf,
    /// Directory holding the engine's default network file.
    pub network_dir: PathBuf,
    /// Tablebases for the `tablebase` suite.
    pub tablebase: Option<TablebaseDir>,
}

/// File name `export_net` writes in the suite directory.
const EXPORTED_NETWORK: &str = "verify.nnue";

/// The engine a stateful suite keeps alive between tests.
#[derive(Default)]
struct EngineSlot {
    session: Option<ProcessSession>,
}

impl EngineSlot {
    fn start(&mut self, ctx: &SuiteContext) -> Result<(), HarnessError> {
        self.session = Some(ctx.interactive()?);
        Ok(())
    }

    fn get(&mut self) -> Result<&mut ProcessSession, HarnessError> {
        self.session.as_mut().ok_or_else(|| HarnessError::SessionClosed {
            detail: "engine was never started".into(),
            exit_code: None,
        })
    }

    fn session(&mut self) -> Option<&mut ProcessSession> {
        self.session.as_mut()
    }

    /// Send the quit command and require a clean exit.
    fn shutdown(&mut self) -> Result<(), HarnessError> {
        let session = self.get()?;
        // An engine that already died still has an exit code to check.
        if let Err(e) = session.quit() {
            tracing::warn!(error = %e, "quit could not be delivered");
        }
        let code = session.close()?;
        if code != 0 {
            return Err(HarnessError::NonZeroExit {
                command: session.options().command_line().join(" "),
                code,
            });
        }
        Ok(())
    }
}

/// Send each command in order without waiting for output.
fn send_all(session: &mut ProcessSession, commands: &[&str]) -> Result<(), HarnessError> {
    for command in commands {
        session.send_command(command)?;
    }
    Ok(())
}

/// Structure of an `info depth` line at `depth`, optionally with WDL stats.
fn info_line_pattern(depth: Option<u32>, wdl: bool) -> Result<Regex, HarnessError> {
    let depth = depth.map_or_else(|| r"\d+".to_string(), |d| d.to_string());
    let wdl = if wdl { r" wdl \d+ \d+ \d+" } else { "" };
    Ok(Regex::new(&format!(
        r"^info depth {depth} seldepth \d+ multipv \d+ score cp -?\d+{wdl} nodes \d+ nps \d+ hashfull \d+ tbhits \d+ time \d+ pv"
    ))?)
}
