//! A scripted engine that speaks enough UCI to exercise the harness.
//!
//! With arguments, the joined arguments are executed as one command and the
//! process exits, like a real engine's command-line mode. Without arguments
//! it prints a banner and reads commands from stdin until `quit` or EOF.
//!
//! Besides the protocol commands it understands a few test hooks:
//! `tsan` and `ubsan` print a sanitizer report to stderr, `crash` aborts,
//! `exit <code>` exits with that code, `echo <text>` prints the text and
//! `ignore-quit` makes it ignore `quit` and stdin EOF.
//!
//! Setting `SyzygyPath` counts the `.rtbw` and `.rtbz` files in that
//! directory. Positions with no more pieces than the largest table then
//! score `cp 20000` for the side to move being white, `cp -20000` for black.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;

const NAME: &str = "Alexander";
const NETWORK: &str = "nn-mock.nnue";
/// Bytes written by `export_net`.
const NETWORK_BYTES: &[u8] = b"parley mock network v1\n";
const DEFAULT_DEPTH: u32 = 3;
const STARTPOS_PIECES: usize = 32;
const TB_WIN: i32 = 20000;

struct Engine {
    options: HashMap<String, String>,
    ignore_quit: bool,
    /// Largest table found under `SyzygyPath`, 0 when none are loaded.
    tablebase_pieces: usize,
    pieces: usize,
    black_to_move: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            options: HashMap::new(),
            ignore_quit: false,
            tablebase_pieces: 0,
            pieces: STARTPOS_PIECES,
            black_to_move: false,
        }
    }
}

enum Flow {
    Continue,
    Exit(i32),
}

impl Engine {
    fn show_wdl(&self) -> bool {
        self.options
            .get("UCI_ShowWDL")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    fn execute(&mut self, out: &mut impl Write, line: &str) -> io::Result<Flow> {
        let mut tokens = line.split_whitespace();
        let Some(command) = tokens.next() else {
            return Ok(Flow::Continue);
        };
        let rest: Vec<&str> = tokens.collect();

        match command {
            "uci" => {
                writeln!(out, "id name {NAME} mock")?;
                writeln!(out, "id author the parley developers")?;
                writeln!(out)?;
                writeln!(out, "option name Threads type spin default 1 min 1 max 1024")?;
                writeln!(out, "option name Hash type spin default 16 min 1 max 33554432")?;
                writeln!(out, "option name Clear Hash type button")?;
                writeln!(out, "option name MultiPV type spin default 1 min 1 max 256")?;
                writeln!(out, "option name UCI_ShowWDL type check default false")?;
                writeln!(out, "option name EvalFile type string default {NETWORK}")?;
                writeln!(out, "uciok")?;
            }
            "isready" => writeln!(out, "readyok")?,
            "setoption" => self.set_option(out, &rest)?,
            "position" => self.set_position(&rest),
            "flip" => self.black_to_move = !self.black_to_move,
            "ucinewgame" | "stop" => {}
            "go" => self.search(out, &rest)?,
            "bench" => {
                let depth = DEFAULT_DEPTH.to_string();
                self.search(out, &["depth", depth.as_str()])?;
                writeln!(out)?;
                writeln!(out, "===========================")?;
                writeln!(out, "Total time (ms) : 1")?;
                writeln!(out, "Nodes searched  : 4096")?;
                writeln!(out, "Nodes/second    : 4096000")?;
            }
            "eval" => writeln!(out, "Final evaluation       +0.12 (white side)")?,
            "d" => {
                writeln!(out, " +---+---+---+---+---+---+---+---+")?;
                writeln!(out, "Fen: rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1")?;
            }
            "compiler" => writeln!(out, "Compiled by rustc (mock)")?,
            "license" => writeln!(out, "{NAME} mock is free software.")?,
            "export_net" => {
                let path = rest.first().copied().unwrap_or(NETWORK);
                std::fs::write(path, NETWORK_BYTES)?;
                writeln!(out, "Network saved successfully to {path}")?;
            }
            "echo" => writeln!(out, "{}", rest.join(" "))?,
            "tsan" => {
                out.flush()?;
                eprintln!("==================");
                eprintln!("WARNING: ThreadSanitizer: data race (pid={})", std::process::id());
                eprintln!("  Write of size 8 at 0x7b0400000000 by thread T1:");
                eprintln!("==================");
            }
            "ubsan" => {
                out.flush()?;
                eprintln!("search.cpp:42:17: runtime error: signed integer overflow");
            }
            "crash" => {
                out.flush()?;
                std::process::abort();
            }
            "exit" => {
                let code = rest.first().and_then(|c| c.parse().ok()).unwrap_or(0);
                return Ok(Flow::Exit(code));
            }
            "ignore-quit" => self.ignore_quit = true,
            "quit" if !self.ignore_quit => return Ok(Flow::Exit(0)),
            "quit" => {}
            _ => writeln!(out, "Unknown command: '{line}'. Type help for more information.")?,
        }
        out.flush()?;
        Ok(Flow::Continue)
    }

    fn set_option(&mut self, out: &mut impl Write, tokens: &[&str]) -> io::Result<()> {
        let line = tokens.join(" ");
        let Some(rest) = line.strip_prefix("name ") else {
            return Ok(());
        };
        let (name, value) = match rest.split_once(" value ") {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (rest.trim(), ""),
        };
        if name == "SyzygyPath" {
            let (wdl, dtz, pieces) = count_tablebases(Path::new(value));
            self.tablebase_pieces = pieces;
            writeln!(
                out,
                "info string Found {wdl} WDL and {dtz} DTZ tablebase files (up to {pieces}-man)."
            )?;
        }
        self.options.insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// Track the piece count and side to move of `position startpos|fen ...`.
    fn set_position(&mut self, tokens: &[&str]) {
        let moves = tokens
            .iter()
            .position(|t| *t == "moves")
            .map_or(0, |i| tokens.len() - i - 1);
        let (pieces, black) = match tokens {
            ["fen", board, side, ..] => (
                board.chars().filter(char::is_ascii_alphabetic).count(),
                *side == "b",
            ),
            _ => (STARTPOS_PIECES, false),
        };
        self.pieces = pieces;
        self.black_to_move = black ^ (moves % 2 == 1);
    }

    fn score(&self) -> i32 {
        if self.tablebase_pieces > 0 && self.pieces <= self.tablebase_pieces {
            if self.black_to_move {
                -TB_WIN
            } else {
                TB_WIN
            }
        } else {
            20
        }
    }

    fn search(&self, out: &mut impl Write, tokens: &[&str]) -> io::Result<()> {
        let depth = tokens
            .iter()
            .position(|t| *t == "depth")
            .and_then(|i| tokens.get(i + 1))
            .and_then(|d| d.parse().ok())
            .unwrap_or(DEFAULT_DEPTH);
        let best = tokens
            .iter()
            .position(|t| *t == "searchmoves")
            .and_then(|i| tokens.get(i + 1))
            .copied()
            .unwrap_or("e2e4");

        let score = self.score();
        for d in 1..=depth {
            let wdl = if self.show_wdl() { " wdl 52 940 8" } else { "" };
            let nodes = 20 * u64::from(d) * u64::from(d);
            writeln!(
                out,
                "info depth {d} seldepth {d} multipv 1 score cp {score}{wdl} nodes {nodes} nps {} hashfull 0 tbhits 0 time 1 pv {best}",
                nodes * 1000
            )?;
        }
        writeln!(out, "bestmove {best} ponder e7e5")
    }
}

/// WDL files, DTZ files and the largest piece count under `dir`.
fn count_tablebases(dir: &Path) -> (usize, usize, usize) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return (0, 0, 0);
    };
    let (mut wdl, mut dtz, mut pieces) = (0, 0, 0);
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((stem, extension)) = name.rsplit_once('.') else {
            continue;
        };
        match extension {
            "rtbw" => wdl += 1,
            "rtbz" => dtz += 1,
            _ => continue,
        }
        pieces = pieces.max(stem.chars().filter(char::is_ascii_uppercase).count());
    }
    (wdl, dtz, pieces)
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("mock engine: {e}");
            1
        }
    };
    std::process::exit(code);
}

fn run() -> io::Result<i32> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut engine = Engine::default();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return match engine.execute(&mut out, &args.join(" "))? {
            Flow::Exit(code) => Ok(code),
            Flow::Continue => Ok(0),
        };
    }

    writeln!(out, "{NAME} mock engine by the parley developers")?;
    out.flush()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        if let Flow::Exit(code) = engine.execute(&mut out, line?.trim())? {
            return Ok(code);
        }
    }
    while engine.ignore_quit {
        std::thread::sleep(Duration::from_secs(1));
    }
    Ok(0)
}
