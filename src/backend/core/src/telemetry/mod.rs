//! Telemetry: structured logging for the authorization engine.
//!
//! The library itself only emits `tracing` events and `metrics` counters.
//! Hosts that do not already run a subscriber can install one here.
//!
//! # Example
//!
//! ```rust,no_run
//! use warrant_core::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! ```

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig};
