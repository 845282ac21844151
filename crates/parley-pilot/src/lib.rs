//! Child process driver for line-oriented protocol engines.
//!
//! Spawns the engine under test (optionally behind a wrapper such as
//! valgrind), writes commands to its stdin and records every line it emits
//! on stdout or stderr.
//!
//! # Architecture
//!
//! - [`process::ProcessSession`]: owns the child, its stdin and the drain thread
//! - [`output::OutputBuffer`]: retained history of emitted lines plus a read cursor
//! - [`terminate`]: bounded waiting and SIGTERM/SIGKILL escalation

pub mod output;
pub mod process;
pub mod terminate;

pub use output::{OutputBuffer, ReadOutcome};
pub use process::{ProcessSession, SessionOptions};
