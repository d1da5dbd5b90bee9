//! Lezgi Translator - Russian ↔ Lezghian translation with a local model
//!
//! This library exports the worker/controller pair and its runtime seam for
//! the binary and for tests.

/// Configuration management
pub mod config;
/// Foreground worker controller
pub mod controller;
/// Language tags
pub mod language;
/// Model runtime seam and hub-backed implementation
pub mod pipeline;
/// Controller ↔ worker message protocol
pub mod protocol;
/// Logging setup
pub mod telemetry;
/// Background inference worker
pub mod worker;

#[cfg(test)]
mod test_utils;
