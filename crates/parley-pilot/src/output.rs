//! Retained output history with a matcher read cursor.
//!
//! The drain thread feeds raw bytes from the child's output pipe, which are
//! split into lines and appended to the history. Matchers on the test thread
//! pull lines through a cursor. History is only dropped by an explicit
//! [`OutputBuffer::take`] or [`OutputBuffer::clear`], so a post-test scan
//! sees every line emitted since the previous clear, including lines a
//! matcher already consumed.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Result of pulling the next line through the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The next unread line.
    Line(String),
    /// The writer side closed and every line has been consumed.
    Eof,
    /// No line arrived before the deadline.
    TimedOut,
}

#[derive(Debug, Default)]
struct BufferState {
    /// Every completed line since the last clear.
    history: Vec<String>,
    /// Index of the next line a matcher will read.
    cursor: usize,
    /// Partial line accumulator for bytes that don't end with a newline.
    partial: Vec<u8>,
    /// Set once the producer hit end-of-stream.
    closed: bool,
}

/// Line history shared between one producer (the drain thread) and one
/// consumer (the test thread).
///
/// All state sits behind a single mutex so the history and the cursor are
/// always observed together; the condition variable wakes a waiting reader
/// when a line is appended or the stream closes.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    state: Mutex<BufferState>,
    changed: Condvar,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().expect("output buffer lock poisoned")
    }

    /// Feed raw bytes from the child and return how many lines completed.
    ///
    /// Lines are split on `\n` and a trailing `\r` is dropped. A trailing
    /// partial line is kept until the next `feed()` or [`finish`](Self::finish).
    pub fn feed(&self, data: &[u8]) -> usize {
        let mut state = self.lock();
        let mut completed = 0;

        for &byte in data {
            if byte == b'\n' {
                let raw = std::mem::take(&mut state.partial);
                state.history.push(decode_line(&raw));
                completed += 1;
            } else {
                state.partial.push(byte);
            }
        }

        if completed > 0 {
            self.changed.notify_all();
        }
        completed
    }

    /// Append one complete line.
    pub fn push_line(&self, line: impl Into<String>) {
        let mut state = self.lock();
        state.history.push(line.into());
        self.changed.notify_all();
    }

    /// Mark end-of-stream, flushing any unterminated partial line first.
    pub fn finish(&self) {
        let mut state = self.lock();
        if !state.partial.is_empty() {
            let raw = std::mem::take(&mut state.partial);
            state.history.push(decode_line(&raw));
        }
        state.closed = true;
        self.changed.notify_all();
    }

    /// Pull the next unread line, blocking until `deadline` at the latest.
    pub fn next_line(&self, deadline: Instant) -> ReadOutcome {
        let mut state = self.lock();
        loop {
            if state.cursor < state.history.len() {
                let line = state.history[state.cursor].clone();
                state.cursor += 1;
                return ReadOutcome::Line(line);
            }
            if state.closed {
                return ReadOutcome::Eof;
            }
            let now = Instant::now();
            if now >= deadline {
                return ReadOutcome::TimedOut;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(state, deadline - now)
                .expect("output buffer lock poisoned");
            state = guard;
        }
    }

    /// Block until the producer closed the stream. Returns `false` on timeout.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.closed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(state, deadline - now)
                .expect("output buffer lock poisoned");
            state = guard;
        }
        true
    }

    /// Copy of the full retained history, consumed or not.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Move the retained history out and reset the cursor under one lock.
    ///
    /// A line the producer appends concurrently lands either in the returned
    /// history or in the fresh one, never in neither.
    pub fn take(&self) -> Vec<String> {
        let mut state = self.lock();
        state.cursor = 0;
        std::mem::take(&mut state.history)
    }

    /// Drop the retained history and reset the cursor.
    ///
    /// Lines that arrive afterwards are the only ones visible. The closed
    /// flag survives: a clear does not resurrect a finished stream.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.history.clear();
        state.cursor = 0;
    }

    /// Number of retained lines.
    pub fn len(&self) -> usize {
        self.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().history.is_empty()
    }

    /// Lines appended but not yet read through the cursor.
    pub fn unread(&self) -> usize {
        let state = self.lock();
        state.history.len() - state.cursor
    }

    /// Position of the cursor within the current history.
    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
