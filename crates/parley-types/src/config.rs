//! Harness configuration.
//!
//! Every knob has a built-in default so a run needs no config file at all.
//! A TOML file can override any subset of fields, and a couple of
//! `PARLEY_*` environment variables override the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ParleyError;

/// Maximum config file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 256 * 1024;

/// Environment variable overriding [`HarnessConfig::match_timeout_secs`].
pub const CONFIG_ENV_TIMEOUT: &str = "PARLEY_MATCH_TIMEOUT_SECS";

/// Environment variable overriding [`HarnessConfig::close_grace_secs`].
pub const CONFIG_ENV_GRACE: &str = "PARLEY_GRACE_SECS";

/// Maps a command verb to the line that ends its response.
///
/// A command whose first token equals `command` is considered answered once
/// a line starting with `terminal_prefix` has been read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminatorRule {
    pub command: String,
    pub terminal_prefix: String,
}

impl TerminatorRule {
    pub fn new(command: impl Into<String>, terminal_prefix: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            terminal_prefix: terminal_prefix.into(),
        }
    }
}

/// Top-level configuration for a harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Upper bound for a single matcher invocation.
    pub match_timeout_secs: u64,
    /// Upper bound for a one-shot invocation to run to completion.
    pub oneshot_timeout_secs: u64,
    /// How long `close()` waits for a voluntary exit before signalling.
    pub close_grace_secs: u64,
    /// Command that asks the engine to shut down.
    pub quit_command: String,
    /// Appended to every command written to the engine.
    pub line_terminator: String,
    /// Per-command-class response terminators.
    pub terminators: Vec<TerminatorRule>,
    /// Substrings that identify a report injected by an analysis tool.
    pub diagnostic_markers: Vec<String>,
    /// Lines of context printed from a diagnostic hit onward.
    pub diagnostic_context_lines: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            match_timeout_secs: 300,
            oneshot_timeout_secs: 600,
            close_grace_secs: 30,
            quit_command: "quit".into(),
            line_terminator: "\n".into(),
            terminators: vec![
                TerminatorRule::new("go", "bestmove"),
                TerminatorRule::new("uci", "uciok"),
                TerminatorRule::new("isready", "readyok"),
                TerminatorRule::new("bench", "Nodes/second"),
            ],
            diagnostic_markers: vec![
                "runtime error:".into(),
                "WARNING: ThreadSanitizer:".into(),
                "ERROR: AddressSanitizer:".into(),
                "ERROR: LeakSanitizer:".into(),
            ],
            diagnostic_context_lines: 50,
        }
    }
}

impl HarnessConfig {
    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ParleyError> {
        toml::from_str(content).map_err(|e| ParleyError::ConfigError(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, ParleyError> {
        toml::to_string_pretty(self).map_err(|e| ParleyError::ConfigError(e.to_string()))
    }

    /// Load a configuration file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ParleyError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            ParleyError::ConfigError(format!("cannot read config file {}: {e}", path.display()))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ParleyError::ConfigError(format!(
                "config file {} exceeds maximum size of {MAX_CONFIG_FILE_SIZE} bytes (actual: {} bytes)",
                path.display(),
                metadata.len()
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            ParleyError::ConfigError(format!("cannot read config file {}: {e}", path.display()))
        })?;

        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PARLEY_*` environment variable overrides in place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ParleyError> {
        if let Some(secs) = env_secs(CONFIG_ENV_TIMEOUT)? {
            self.match_timeout_secs = secs;
        }
        if let Some(secs) = env_secs(CONFIG_ENV_GRACE)? {
            self.close_grace_secs = secs;
        }
        Ok(())
    }

    /// Reject configurations that would make every matcher fail instantly.
    pub fn validate(&self) -> Result<(), ParleyError> {
        if self.match_timeout_secs == 0 {
            return Err(ParleyError::ConfigError(
                "match_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.quit_command.trim().is_empty() {
            return Err(ParleyError::ConfigError("quit_command must not be empty".into()));
        }
        if let Some(rule) = self
            .terminators
            .iter()
            .find(|r| r.command.trim().is_empty() || r.terminal_prefix.is_empty())
        {
            return Err(ParleyError::ConfigError(format!(
                "terminator rule has an empty field: {rule:?}"
            )));
        }
        Ok(())
    }

    /// Terminal-line prefix for a command line, keyed on its first token.
    pub fn terminator_for(&self, command_line: &str) -> Option<&str> {
        let verb = command_line.split_whitespace().next()?;
        self.terminators
            .iter()
            .find(|rule| rule.command == verb)
            .map(|rule| rule.terminal_prefix.as_str())
    }

    pub fn match_timeout(&self) -> Duration {
        Duration::from_secs(self.match_timeout_secs)
    }

    pub fn oneshot_timeout(&self) -> Duration {
        Duration::from_secs(self.oneshot_timeout_secs)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_secs(self.close_grace_secs)
    }
}

fn env_secs(name: &str) -> Result<Option<u64>, ParleyError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ParleyError::ConfigError(format!("{name}={value:?} is not a number: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_uci_terminators() {
        let config = HarnessConfig::default();
        assert_eq!(config.terminator_for("go depth 5"), Some("bestmove"));
        assert_eq!(config.terminator_for("uci"), Some("uciok"));
        assert_eq!(config.terminator_for("isready"), Some("readyok"));
        assert_eq!(config.terminator_for("bench 16 1 8 default depth"), Some("Nodes/second"));
        assert_eq!(config.terminator_for("position startpos"), None);
        assert_eq!(config.terminator_for(""), None);
    }

    #[test]
    fn verb_must_match_whole_token() {
        let config = HarnessConfig::default();
        // `ucinewgame` shares a prefix with `uci` but has no response.
        assert_eq!(config.terminator_for("ucinewgame"), None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = HarnessConfig::from_toml("match_timeout_secs = 7\n").expect("should parse");
        assert_eq!(config.match_timeout_secs, 7);
        assert_eq!(config.quit_command, "quit");
        assert_eq!(config.diagnostic_context_lines, 50);
        assert!(!config.terminators.is_empty());
    }

    #[test]
    fn toml_roundtrip_preserves_terminators() {
        let mut config = HarnessConfig::default();
        config.terminators.push(TerminatorRule::new("perft", "Nodes searched"));
        let text = config.to_toml().expect("should serialize");
        let parsed = HarnessConfig::from_toml(&text).expect("should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn load_rejects_oversized_file() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let path = tmp.path().join("big.toml");
        std::fs::write(&path, vec![b'#'; (MAX_CONFIG_FILE_SIZE + 1) as usize]).expect("write");

        let err = HarnessConfig::load(&path).unwrap_err().to_string();
        assert!(err.contains("exceeds maximum size"), "got: {err}");
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let config = HarnessConfig {
            match_timeout_secs: 0,
            ..HarnessConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_terminator_prefix() {
        let mut config = HarnessConfig::default();
        config.terminators.push(TerminatorRule::new("stop", ""));
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("empty field"), "got: {err}");
    }
}
