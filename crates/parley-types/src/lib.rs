//! Core types shared across all parley crates.
//!
//! Defines the harness configuration, the instrumentation modes that wrap
//! the engine under test, and the error type used by the process layer.

pub mod config;
pub mod error;
pub mod instrument;

pub use config::{HarnessConfig, TerminatorRule, CONFIG_ENV_GRACE, CONFIG_ENV_TIMEOUT};
pub use error::ParleyError;
pub use instrument::Instrumentation;
