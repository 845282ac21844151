//! Error types shared across all parley crates.

/// Errors raised by the process and configuration layers.
///
/// Assertion-level failures live in `parley-harness`; this type only covers
/// what can go wrong while spawning, feeding and reaping a child process or
/// while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("process I/O error: {0}")]
    IoError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}
