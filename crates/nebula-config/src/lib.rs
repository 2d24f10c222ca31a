//! Configuration for the Nebula gamepad layer.
//!
//! Settings persist to disk as a RON file, accept CLI overrides via clap, and
//! stay forward/backward compatible through `#[serde(default)]`.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, GamepadConfig, default_config_dir};
pub use error::ConfigError;
