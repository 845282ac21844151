//! Builder-style expectations over a live engine session.
//!
//! [`Expect`] wraps a [`ProcessSession`] and pulls lines through the output
//! buffer's cursor until an [`Expectation`] is satisfied, the response unit
//! of the last command ends without it, the engine goes away, or the
//! timeout expires. Methods are chainable and return `&mut Self`.
//!
//! # Example
//!
//! ```no_run
//! # use parley_harness::{Expect, HarnessError};
//! # use parley_pilot::ProcessSession;
//! # fn example(session: &mut ProcessSession) -> Result<(), HarnessError> {
//! Expect::new(session)
//!     .send("uci")?
//!     .starts_with("id name")?
//!     .equals("uciok")?
//!     .send("go depth 5")?
//!     .starts_with("bestmove")?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

use parley_pilot::{ProcessSession, ReadOutcome};

use crate::error::HarnessError;
use crate::wildcard::WildcardPattern;

/// Upper bound for a single matcher when nothing else is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How long to wait for the exit status once the output pipe reached EOF.
const EXIT_STATUS_WAIT: Duration = Duration::from_millis(500);

/// Predicate type for [`Expectation::Callback`].
pub type LinePredicate<'a> = Box<dyn FnMut(&str) -> Result<bool, HarnessError> + 'a>;

/// One thing a test expects the engine to say.
pub enum Expectation<'a> {
    /// A line equal to the text (trailing whitespace ignored).
    Equals(String),
    /// A line starting with the prefix.
    StartsWith(String),
    /// The substring somewhere in the lines read so far.
    Contains(String),
    /// A `*` pattern over the lines read so far.
    Wildcard(WildcardPattern),
    /// A predicate fed every line until it returns `Ok(true)`.
    Callback(LinePredicate<'a>),
}

impl<'a> Expectation<'a> {
    /// Build a callback expectation from a closure.
    pub fn callback<F>(predicate: F) -> Self
    where
        F: FnMut(&str) -> Result<bool, HarnessError> + 'a,
    {
        Self::Callback(Box::new(predicate))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Equals(text) => format!("line equal to {text:?}"),
            Self::StartsWith(prefix) => format!("line starting with {prefix:?}"),
            Self::Contains(needle) => format!("output containing {needle:?}"),
            Self::Wildcard(pattern) => format!("output matching {:?}", pattern.as_str()),
            Self::Callback(_) => "callback to accept a line".to_string(),
        }
    }

    /// Whether reaching the terminal line of the response unit ends the
    /// search with a mismatch. Callbacks decide termination themselves.
    fn bounded_by_terminal(&self) -> bool {
        !matches!(self, Self::Callback(_))
    }

    fn evaluate(&mut self, unit: &ResponseUnit) -> Result<bool, HarnessError> {
        let line = unit.last_line();
        match self {
            Self::Equals(text) => Ok(line.trim_end() == text.as_str()),
            Self::StartsWith(prefix) => Ok(line.starts_with(prefix.as_str())),
            Self::Contains(needle) => Ok(unit.tail_contains(needle)),
            Self::Wildcard(pattern) => Ok(pattern.matches_trailing_lines(&unit.text)),
            Self::Callback(predicate) => predicate(line),
        }
    }
}

impl fmt::Debug for Expectation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Lines read by one matcher invocation, joined with `\n`.
#[derive(Debug, Default)]
struct ResponseUnit {
    text: String,
    /// Byte offset in `text` where the newest line starts.
    last_start: usize,
    lines: usize,
}

impl ResponseUnit {
    fn push(&mut self, line: &str) {
        if self.lines > 0 {
            self.text.push('\n');
        }
        self.last_start = self.text.len();
        self.text.push_str(line);
        self.lines += 1;
    }

    fn last_line(&self) -> &str {
        &self.text[self.last_start..]
    }

    fn last_line_owned(&self) -> Option<String> {
        (self.lines > 0).then(|| self.last_line().to_string())
    }

    /// Substring search limited to matches that end in the newest line;
    /// anything earlier was already ruled out on a previous line.
    fn tail_contains(&self, needle: &str) -> bool {
        let mut start = self.last_start.saturating_sub(needle.len());
        while !self.text.is_char_boundary(start) {
            start -= 1;
        }
        self.text[start..].contains(needle)
    }
}

/// A builder for expectations on one process session.
#[derive(Debug)]
pub struct Expect<'a> {
    session: &'a mut ProcessSession,
    timeout: Duration,
}

impl<'a> Expect<'a> {
    /// Create a new Expect wrapper with the default timeout.
    pub fn new(session: &'a mut ProcessSession) -> Self {
        Self {
            session,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the timeout for subsequent matchers.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    /// Send a command line to the engine.
    pub fn send(&mut self, line: &str) -> Result<&mut Self, HarnessError> {
        self.session.send_command(line)?;
        Ok(self)
    }

    pub fn equals(&mut self, text: &str) -> Result<&mut Self, HarnessError> {
        self.check(Expectation::Equals(text.to_string()))
    }

    pub fn starts_with(&mut self, prefix: &str) -> Result<&mut Self, HarnessError> {
        self.check(Expectation::StartsWith(prefix.to_string()))
    }

    pub fn contains(&mut self, needle: &str) -> Result<&mut Self, HarnessError> {
        self.check(Expectation::Contains(needle.to_string()))
    }

    pub fn wildcard(&mut self, pattern: &str) -> Result<&mut Self, HarnessError> {
        self.check(Expectation::Wildcard(WildcardPattern::new(pattern)?))
    }

    /// Feed lines to `predicate` until it returns `Ok(true)`.
    ///
    /// An `Err` from the predicate fails the matcher immediately.
    pub fn callback<F>(&mut self, predicate: F) -> Result<&mut Self, HarnessError>
    where
        F: FnMut(&str) -> Result<bool, HarnessError>,
    {
        self.check(Expectation::callback(predicate))
    }

    /// Pull lines until `expectation` is satisfied.
    ///
    /// The cursor stops right after the line that satisfied it. Reading the
    /// pending terminal line of the last command ends the response unit; for
    /// every variant except [`Expectation::Callback`] that is a
    /// [`HarnessError::Mismatch`] carrying the terminal line.
    pub fn check(&mut self, mut expectation: Expectation<'_>) -> Result<&mut Self, HarnessError> {
        let deadline = Instant::now() + self.timeout;
        let terminal = self.session.pending_terminal().map(str::to_owned);
        let bounded = expectation.bounded_by_terminal();
        let mut unit = ResponseUnit::default();

        loop {
            let line = match self.session.buffer().next_line(deadline) {
                ReadOutcome::Line(line) => line,
                ReadOutcome::TimedOut => {
                    debug!(expected = %expectation.describe(), "matcher timed out");
                    return Err(HarnessError::Timeout {
                        expected: expectation.describe(),
                        waited: self.timeout,
                        last_line: unit.last_line_owned(),
                    });
                }
                ReadOutcome::Eof => {
                    let exit_code = self.exit_code_after_eof();
                    return Err(HarnessError::SessionClosed {
                        detail: format!("output ended while waiting for {}", expectation.describe()),
                        exit_code,
                    });
                }
            };

            let is_terminal = terminal
                .as_deref()
                .is_some_and(|prefix| line.starts_with(prefix));
            if is_terminal {
                self.session.finish_response();
            }
            unit.push(&line);

            if expectation.evaluate(&unit)? {
                debug!(expected = %expectation.describe(), line = %line, "matched");
                return Ok(self);
            }
            if is_terminal && bounded {
                return Err(HarnessError::Mismatch {
                    expected: expectation.describe(),
                    actual: line,
                });
            }
        }
    }

    /// Check the full retained history, consumed lines included, without
    /// moving the cursor.
    pub fn contains_in_history(&mut self, needle: &str) -> Result<&mut Self, HarnessError> {
        let history = self.session.output();
        if history.join("\n").contains(needle) {
            return Ok(self);
        }
        Err(HarnessError::Mismatch {
            expected: format!("history containing {needle:?}"),
            actual: history.last().cloned().unwrap_or_default(),
        })
    }

    fn exit_code_after_eof(&mut self) -> Option<i32> {
        let deadline = Instant::now() + EXIT_STATUS_WAIT;
        loop {
            match self.session.poll_exit() {
                Ok(Some(code)) => return Some(code),
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                _ => return None,
            }
        }
    }
}
