pub mod cli;
#[allow(clippy::module_inception)]
pub mod config;
pub mod types;

pub use cli::CliConfig;
pub use config::{ClientConfig, ConfigError};
pub use types::{LogLevel, parse_duration};
