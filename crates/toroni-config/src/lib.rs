//! TOML-backed configuration for a Toroni bus.

mod config;

pub use config::{BusConfig, ConfigError};
