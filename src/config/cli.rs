use clap::Parser;
use std::{path::PathBuf, time::Duration};

use super::config::{ClientConfig, ConfigError};
use super::types::{LogLevel, parse_duration};

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub config_file_location: Option<PathBuf>,
    pub log_level: LogLevel,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub rate_limit: Option<u32>,
    pub rate_interval: Option<Duration>,
    pub pool_min: Option<u32>,
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Static -----------------------------------------------------

impl CliConfig {
    pub fn from_args() -> Self {
        Self::from(Args::parse())
    }
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Public -----------------------------------------------------

impl CliConfig {
    /// File settings (or defaults when no file was given), with command-line
    /// overrides applied on top.
    pub async fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let mut cfg = match &self.config_file_location {
            Some(path) => ClientConfig::from_file(path).await?,
            None => ClientConfig::default(),
        };

        if let Some(host) = &self.host {
            cfg.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(limit) = self.rate_limit {
            cfg.rate_limit = limit;
        }
        if let Some(interval) = self.rate_interval {
            cfg.rate_interval = interval;
        }
        if let Some(min) = self.pool_min {
            cfg.pool_min = min;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

impl From<Args> for CliConfig {
    fn from(args: Args) -> Self {
        Self {
            config_file_location: args.config_file,
            log_level: args.log_level,
            host: args.host,
            port: args.port,
            rate_limit: args.rate_limit,
            rate_interval: args.rate_interval,
            pool_min: args.pool_min,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "vndbpool",
    version,
    about = "Send commands to the VNDB TCP API, one per line on stdin"
)]
pub struct Args {
    // Optional; built-in defaults apply without it.
    #[arg(long = "config", short = 'c', env = "VNDBPOOL_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    // Not required via CLI or ENV (defaults to info).
    #[arg(long = "log", default_value = "info")]
    log_level: LogLevel,

    #[arg(long = "host", short = 'H', env = "VNDBPOOL_HOST")]
    host: Option<String>,

    #[arg(long = "port", short = 'p', env = "VNDBPOOL_PORT")]
    port: Option<u16>,

    #[arg(long = "rate-limit")]
    rate_limit: Option<u32>,

    // Bare milliseconds, a named unit or a humantime string.
    #[arg(long = "rate-interval", value_parser = parse_duration)]
    rate_interval: Option<Duration>,

    #[arg(long = "pool-min")]
    pool_min: Option<u32>,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
