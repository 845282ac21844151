//! Detection of reports injected into engine output by analysis tools.
//!
//! Sanitizers and valgrind write their findings to the same stream the
//! protocol uses. A test whose protocol exchange looked perfect still fails
//! when one of these markers shows up anywhere in the history.

use parley_types::HarnessConfig;
use tracing::warn;

use crate::error::HarnessError;

/// The first marker found in a history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticHit {
    pub marker: String,
    /// Zero-based index of the offending line.
    pub line: usize,
    /// The offending line and up to `context_lines - 1` lines after it.
    pub context: Vec<String>,
}

impl From<DiagnosticHit> for HarnessError {
    fn from(hit: DiagnosticHit) -> Self {
        HarnessError::Diagnostic {
            marker: hit.marker,
            line: hit.line,
            context: hit.context,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticScanner {
    markers: Vec<String>,
    context_lines: usize,
}

impl DiagnosticScanner {
    pub fn new(markers: Vec<String>, context_lines: usize) -> Self {
        Self {
            markers,
            context_lines: context_lines.max(1),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            config.diagnostic_markers.clone(),
            config.diagnostic_context_lines,
        )
    }

    /// Find the earliest line containing any marker.
    pub fn scan(&self, history: &[String]) -> Option<DiagnosticHit> {
        history.iter().enumerate().find_map(|(index, line)| {
            let marker = self.markers.iter().find(|m| line.contains(m.as_str()))?;
            let end = (index + self.context_lines).min(history.len());
            Some(DiagnosticHit {
                marker: marker.clone(),
                line: index,
                context: history[index..end].to_vec(),
            })
        })
    }

    /// Fail with [`HarnessError::Diagnostic`] when `history` contains a marker.
    pub fn check(&self, history: &[String]) -> Result<(), HarnessError> {
        match self.scan(history) {
            Some(hit) => {
                warn!(marker = %hit.marker, line = hit.line, "diagnostic report in engine output");
                Err(hit.into())
            }
            None => Ok(()),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl Default for DiagnosticScanner {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn clean_history_passes() {
        let scanner = DiagnosticScanner::default();
        let history = lines(&["uciok", "readyok", "bestmove e2e4"]);
        assert!(scanner.scan(&history).is_none());
        assert!(scanner.check(&history).is_ok());
    }

    #[test]
    fn thread_sanitizer_report_is_found() {
        let scanner = DiagnosticScanner::default();
        let history = lines(&[
            "bestmove e2e4",
            "==================",
            "WARNING: ThreadSanitizer: data race (pid=4242)",
            "  Write of size 8 at 0x7b04 by thread T1:",
        ]);
        let hit = scanner.scan(&history).expect("should find the report");
        assert_eq!(hit.marker, "WARNING: ThreadSanitizer:");
        assert_eq!(hit.line, 2);
        assert_eq!(hit.context.len(), 2);
    }

    #[test]
    fn context_window_is_capped() {
        let scanner = DiagnosticScanner::new(vec!["runtime error:".into()], 50);
        let mut history = vec!["search.cpp:120:7: runtime error: signed integer overflow".to_string()];
        history.extend((0..100).map(|i| format!("frame {i}")));

        let hit = scanner.scan(&history).expect("should find the report");
        assert_eq!(hit.context.len(), 50);
        assert_eq!(hit.context[0], history[0]);
        assert_eq!(hit.context[49], "frame 48");
    }

    #[test]
    fn earliest_hit_wins() {
        let scanner = DiagnosticScanner::default();
        let history = lines(&[
            "x.cpp:1:1: runtime error: load of misaligned address",
            "WARNING: ThreadSanitizer: data race",
        ]);
        let hit = scanner.scan(&history).expect("should find the report");
        assert_eq!(hit.line, 0);
        assert_eq!(hit.marker, "runtime error:");
    }

    #[test]
    fn check_converts_hit_to_error() {
        let scanner = DiagnosticScanner::default();
        let history = lines(&["ERROR: LeakSanitizer: detected memory leaks"]);
        let err = scanner.check(&history).unwrap_err();
        assert!(matches!(err, HarnessError::Diagnostic { line: 0, .. }), "got {err:?}");
    }
}
