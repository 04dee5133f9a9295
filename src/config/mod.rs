//! Configuration model for taskman.
//!
//! This module defines the EngineConfig struct that represents `config.yaml` in
//! the state directory. It supports forward-compatible YAML parsing (unknown
//! fields are ignored), sensible defaults for every field, and validation of
//! config values.

mod model;
mod operations;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export public API
pub use model::EngineConfig;
