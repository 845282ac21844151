//! How to launch the engine under test.

use std::path::{Path, PathBuf};

use tracing::debug;

use parley_pilot::{ProcessSession, SessionOptions};
use parley_types::{HarnessConfig, Instrumentation};

use crate::error::HarnessError;

/// The engine binary plus everything needed to spawn it consistently.
#[derive(Debug, Clone)]
pub struct EngineTarget {
    executable: PathBuf,
    instrumentation: Instrumentation,
    env: Vec<(String, String)>,
}

impl EngineTarget {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            instrumentation: Instrumentation::None,
            env: Vec::new(),
        }
    }

    pub fn instrumentation(mut self, mode: Instrumentation) -> Self {
        self.instrumentation = mode;
        self
    }

    /// Extra environment variable for every engine launch.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn mode(&self) -> Instrumentation {
        self.instrumentation
    }

    /// Search threads suites should configure for this mode.
    pub fn threads(&self) -> usize {
        self.instrumentation.threads()
    }

    fn options(&self, workdir: &Path, config: &HarnessConfig) -> SessionOptions {
        let mut options = SessionOptions::new(&self.executable, config)
            .prefix(self.instrumentation.prefix())
            .working_dir(workdir);
        for (key, value) in &self.env {
            options = options.env(key, value);
        }
        options
    }

    /// Start a long-lived session that accepts commands on stdin.
    pub fn interactive(
        &self,
        workdir: &Path,
        config: &HarnessConfig,
    ) -> Result<ProcessSession, HarnessError> {
        Ok(ProcessSession::start(self.options(workdir, config))?)
    }

    /// Run the engine with `args` to completion and capture its output.
    pub fn one_shot(
        &self,
        workdir: &Path,
        config: &HarnessConfig,
        args: &[&str],
    ) -> Result<ProcessSession, HarnessError> {
        let options = self.options(workdir, config).args(args.iter().copied()).one_shot(true);
        let session = ProcessSession::start(options)?;
        debug!(args = %args.join(" "), exit_code = ?session.exit_code(), "one-shot run finished");
        Ok(session)
    }
}

/// Fail unless the session exited with 0.
///
/// A one-shot run killed at its timeout is a [`HarnessError::Timeout`];
/// any other non-zero code is a [`HarnessError::NonZeroExit`].
pub fn require_success(session: &ProcessSession) -> Result<(), HarnessError> {
    if session.timed_out() {
        return Err(HarnessError::Timeout {
            expected: format!("`{}` to exit", session.options().command_line().join(" ")),
            waited: session.options().oneshot_timeout,
            last_line: session.output().pop(),
        });
    }
    match session.exit_code() {
        Some(0) => Ok(()),
        Some(code) => Err(HarnessError::NonZeroExit {
            command: session.options().command_line().join(" "),
            code,
        }),
        None => Err(HarnessError::Other(format!(
            "`{}` has not exited",
            session.options().command_line().join(" ")
        ))),
    }
}
