//! Runtime settings for the scene streamer, persisted as RON.
//!
//! Values load from `config.ron` (created with defaults when missing) and can
//! be overridden from the command line.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, LodConfig, PagerConfig, ShaderConfig, ViewportConfig};
pub use error::ConfigError;
