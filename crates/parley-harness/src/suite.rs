//! Test suites, their ordered cases and the context handed to them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use parley_pilot::ProcessSession;
use parley_types::HarnessConfig;

use crate::error::HarnessError;
use crate::expect::Expect;
use crate::target::EngineTarget;

/// Whether a suite keeps one engine alive across its tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuiteKind {
    /// Every test runs its own one-shot invocation.
    Stateless,
    /// One interactive session lives from `before_all` to `after_all`.
    Stateful,
}

/// Signature of a test body.
pub type TestFn<S> = fn(&mut S, &SuiteContext) -> Result<(), HarnessError>;

/// A named test body. Cases run in the order a suite lists them.
pub struct TestCase<S> {
    pub name: &'static str,
    pub run: TestFn<S>,
}

impl<S> TestCase<S> {
    pub const fn new(name: &'static str, run: TestFn<S>) -> Self {
        Self { name, run }
    }
}

// Manual impls: a derive would require `S: Clone`.
impl<S> Clone for TestCase<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for TestCase<S> {}

impl<S> std::fmt::Debug for TestCase<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase").field("name", &self.name).finish()
    }
}

/// Everything a suite may use while it runs.
///
/// Passed explicitly to hooks and bodies; the harness never changes the
/// process-wide working directory.
#[derive(Debug, Clone)]
pub struct SuiteContext {
    suite: String,
    workdir: PathBuf,
    config: Arc<HarnessConfig>,
    target: Arc<EngineTarget>,
}

impl SuiteContext {
    pub fn new(
        suite: impl Into<String>,
        workdir: impl Into<PathBuf>,
        config: Arc<HarnessConfig>,
        target: Arc<EngineTarget>,
    ) -> Self {
        Self {
            suite: suite.into(),
            workdir: workdir.into(),
            config,
            target,
        }
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    /// The suite's private temporary directory; engines start here.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn target(&self) -> &EngineTarget {
        &self.target
    }

    /// Start an interactive engine session in the suite directory.
    pub fn interactive(&self) -> Result<ProcessSession, HarnessError> {
        self.target.interactive(&self.workdir, &self.config)
    }

    /// Run the engine to completion with `args` in the suite directory.
    pub fn one_shot(&self, args: &[&str]) -> Result<ProcessSession, HarnessError> {
        self.target.one_shot(&self.workdir, &self.config, args)
    }

    /// Matchers on `session` bounded by the configured match timeout.
    pub fn expect<'s>(&self, session: &'s mut ProcessSession) -> Expect<'s> {
        Expect::new(session).timeout(self.config.match_timeout())
    }
}

/// A group of ordered test cases sharing lifecycle hooks.
///
/// After every test the runner scans the output of [`session`](Self::session)
/// for diagnostic markers and then clears it, so suites only need to park
/// the session they drove there.
pub trait TestSuite: Sized {
    const NAME: &'static str;
    const KIND: SuiteKind;

    /// The test cases, in execution order.
    fn cases() -> Vec<TestCase<Self>>;

    fn before_all(&mut self, _ctx: &SuiteContext) -> Result<(), HarnessError> {
        Ok(())
    }

    fn before_each(&mut self, _ctx: &SuiteContext) -> Result<(), HarnessError> {
        Ok(())
    }

    fn after_each(&mut self, _ctx: &SuiteContext) -> Result<(), HarnessError> {
        Ok(())
    }

    fn after_all(&mut self, _ctx: &SuiteContext) -> Result<(), HarnessError> {
        Ok(())
    }

    /// The session whose output the diagnostic scan covers.
    fn session(&mut self) -> Option<&mut ProcessSession> {
        None
    }

    /// Runs before every test of a stateful suite.
    ///
    /// The default fails with [`HarnessError::SessionClosed`] once the
    /// suite's engine is gone, so the remaining tests fail immediately
    /// instead of each waiting for its matcher timeout.
    fn health_check(&mut self) -> Result<(), HarnessError> {
        if Self::KIND == SuiteKind::Stateless {
            return Ok(());
        }
        let Some(session) = self.session() else {
            return Err(HarnessError::SessionClosed {
                detail: "suite has no live engine session".into(),
                exit_code: None,
            });
        };
        match session.poll_exit()? {
            Some(code) => Err(HarnessError::SessionClosed {
                detail: "engine exited before the test started".into(),
                exit_code: Some(code),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stateful {
        session: Option<ProcessSession>,
    }

    impl TestSuite for Stateful {
        const NAME: &'static str = "stateful";
        const KIND: SuiteKind = SuiteKind::Stateful;

        fn cases() -> Vec<TestCase<Self>> {
            vec![TestCase::new("noop", |_, _| Ok(()))]
        }

        fn session(&mut self) -> Option<&mut ProcessSession> {
            self.session.as_mut()
        }
    }

    fn context(dir: &Path, program: &str) -> SuiteContext {
        SuiteContext::new(
            "stateful",
            dir,
            Arc::new(HarnessConfig::default()),
            Arc::new(EngineTarget::new(program)),
        )
    }

    #[test]
    fn health_check_requires_a_session() {
        let mut suite = Stateful { session: None };
        assert!(matches!(
            suite.health_check(),
            Err(HarnessError::SessionClosed { exit_code: None, .. })
        ));
    }

    #[test]
    fn health_check_detects_exited_engine() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let ctx = context(tmp.path(), "/bin/cat");
        let mut suite = Stateful {
            session: Some(ctx.interactive().expect("spawn failed")),
        };
        assert!(suite.health_check().is_ok());

        let session = suite.session.as_mut().expect("session");
        session.quit().expect("quit failed");
        session.close().expect("close failed");
        assert!(matches!(
            suite.health_check(),
            Err(HarnessError::SessionClosed { exit_code: Some(0), .. })
        ));
    }

    #[test]
    fn context_exposes_workdir_and_config() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let ctx = context(tmp.path(), "/bin/cat");
        assert_eq!(ctx.workdir(), tmp.path());
        assert_eq!(ctx.suite(), "stateful");
        assert_eq!(ctx.config().quit_command, "quit");
        assert_eq!(Stateful::cases()[0].name, "noop");
    }
}
