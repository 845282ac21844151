//! Files the conformance suites depend on.
//!
//! The benchmark position file and the thread-sanitizer suppression list are
//! generated for the duration of a run and removed when their guard drops.
//! Tablebases are too large to generate; their directory is only inspected.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::HarnessError;

/// Name of the generated benchmark position file.
pub const BENCH_EPD_FILE: &str = "bench_tmp.epd";

/// Name of the generated suppression list.
pub const TSAN_SUPPRESSIONS_FILE: &str = "tsan.supp";

/// Positions written to [`BENCH_EPD_FILE`].
pub const BENCH_POSITIONS: [&str; 4] = [
    "Rn6/1rbq1bk1/2p2n1p/2Bp1p2/3Pp1pP/1N2P1P1/2Q1NPB1/6K1 w - - 2 26",
    "rnbqkb1r/ppp1pp2/5n1p/3p2p1/P2PP3/5P2/1PP3PP/RNBQKBNR w KQkq - 0 3",
    "3qnrk1/4bp1p/1p2p1pP/p2bN3/1P1P1B2/P2BQ3/5PP1/4R1K1 w - - 9 28",
    "r4rk1/1b2ppbp/pq4pB/1p1P4/2p2P1P/2N4Q/PPP3P1/1K1R1B1R b - - 0 20",
];

/// Functions with known benign races in the transposition table.
const TSAN_RACES: [&str; 4] = [
    "TTEntry::read",
    "TTEntry::save",
    "TranspositionTable::probe",
    "TranspositionTable::hashfull",
];

/// Removes a generated file on drop.
#[derive(Debug)]
struct GeneratedFile {
    path: PathBuf,
}

impl GeneratedFile {
    fn write(path: PathBuf, content: &str) -> Result<Self, HarnessError> {
        fs::write(&path, content).map_err(|e| HarnessError::FixtureUnavailable {
            path: path.clone(),
            reason: format!("cannot write: {e}"),
        })?;
        debug!(path = %path.display(), "fixture written");
        Ok(Self { path })
    }
}

impl Drop for GeneratedFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove fixture");
        }
    }
}

/// The benchmark position file, deleted when dropped.
#[derive(Debug)]
pub struct BenchEpd {
    file: GeneratedFile,
}

impl BenchEpd {
    pub fn create(dir: &Path) -> Result<Self, HarnessError> {
        let mut content = BENCH_POSITIONS.join("\n");
        content.push('\n');
        let file = GeneratedFile::write(dir.join(BENCH_EPD_FILE), &content)?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

/// A thread-sanitizer suppression list, deleted when dropped.
///
/// Hand [`env_pair`](Self::env_pair) to every engine launch; the harness
/// does not modify its own environment.
#[derive(Debug)]
pub struct TsanSuppressions {
    file: GeneratedFile,
}

impl TsanSuppressions {
    /// Write suppressions for the engine's `namespace` (e.g. `Alexander`).
    pub fn create(dir: &Path, namespace: &str) -> Result<Self, HarnessError> {
        let content: String = TSAN_RACES
            .iter()
            .map(|function| format!("race:{namespace}::{function}\n"))
            .collect();
        let file = GeneratedFile::write(dir.join(TSAN_SUPPRESSIONS_FILE), &content)?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    /// `("TSAN_OPTIONS", "suppressions=<path>")`.
    pub fn env_pair(&self) -> (String, String) {
        (
            "TSAN_OPTIONS".to_string(),
            format!("suppressions={}", self.file.path.display()),
        )
    }
}

/// A tablebase directory and what the engine should report about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablebaseDir {
    pub path: PathBuf,
    /// Number of `.rtbw` (win/draw/loss) files.
    pub wdl: usize,
    /// Number of `.rtbz` (distance-to-zero) files.
    pub dtz: usize,
    /// Largest piece count covered, read from file names like `KQvK.rtbw`.
    pub max_pieces: usize,
}

impl TablebaseDir {
    /// The line a UCI engine prints after loading this directory.
    pub fn found_message(&self) -> String {
        format!(
            "info string Found {} WDL and {} DTZ tablebase files (up to {}-man).",
            self.wdl, self.dtz, self.max_pieces
        )
    }
}

/// Inspect `path`, failing unless it holds at least one tablebase file.
pub fn require_tablebase_dir(path: &Path) -> Result<TablebaseDir, HarnessError> {
    let unavailable = |reason: String| HarnessError::FixtureUnavailable {
        path: path.to_path_buf(),
        reason,
    };
    let entries = fs::read_dir(path).map_err(|e| unavailable(format!("cannot read directory: {e}")))?;

    let mut found = TablebaseDir {
        path: path.to_path_buf(),
        wdl: 0,
        dtz: 0,
        max_pieces: 0,
    };
    for entry in entries {
        let entry = entry.map_err(|e| unavailable(format!("cannot read directory entry: {e}")))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some((stem, extension)) = name.rsplit_once('.') else {
            continue;
        };
        match extension {
            "rtbw" => found.wdl += 1,
            "rtbz" => found.dtz += 1,
            _ => continue,
        }
        let pieces = stem.chars().filter(|c| c.is_ascii_uppercase()).count();
        found.max_pieces = found.max_pieces.max(pieces);
    }

    if found.wdl == 0 && found.dtz == 0 {
        return Err(unavailable("no .rtbw or .rtbz files".into()));
    }
    Ok(found)
}
