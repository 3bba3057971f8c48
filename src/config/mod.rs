//! Configuration module
//!
//! Handles loading the relay configuration from an optional TOML file.

mod relay;

pub use relay::*;
