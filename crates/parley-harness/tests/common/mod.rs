//! Shared helpers for harness integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::time::Duration;

use parley_harness::{EngineTarget, Expect};
use parley_pilot::ProcessSession;
use parley_types::HarnessConfig;

/// Path of the scripted engine built alongside these tests.
pub const MOCK_ENGINE: &str = env!("CARGO_BIN_EXE_parley-mock-engine");

pub fn mock_target() -> EngineTarget {
    EngineTarget::new(MOCK_ENGINE)
}

/// Short timeouts so a broken test fails in seconds, not minutes.
pub fn quick_config() -> HarnessConfig {
    HarnessConfig {
        match_timeout_secs: 10,
        oneshot_timeout_secs: 20,
        close_grace_secs: 2,
        ..HarnessConfig::default()
    }
}

/// Start the mock engine interactively in a fresh temp dir.
pub fn start_mock(dir: &std::path::Path) -> ProcessSession {
    mock_target()
        .interactive(dir, &quick_config())
        .expect("should start mock engine")
}

pub fn expect(session: &mut ProcessSession) -> Expect<'_> {
    Expect::new(session).timeout(Duration::from_secs(10))
}
