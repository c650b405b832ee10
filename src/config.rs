//! Runtime configuration from CLI flags and environment variables
//!
//! Environment variables (a `.env` file is honored):
//! - `DISCORD_TOKEN` - bot token, also settable with `--token` (required)
//! - `DSTAT_API_BASE` (default: https://discord.com/api/v10)
//! - `DSTAT_GUILD_TIMEOUT_SECS` (default: 20)
//! - `DSTAT_READY_TIMEOUT_SECS` (default: 30)
//! - `DSTAT_LAUNCH_COOLDOWN_SECS` (default: 5)
//! - `DSTAT_REFRESH_MS` - live dashboard redraw interval (default: 500)
//! - `RUST_LOG` (default: warn, or error while the live dashboard is up)

use {
    crate::fleet::FleetConfig,
    clap::Parser,
    std::{env, str::FromStr, time::Duration},
    thiserror::Error,
};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Clone, Parser)]
#[command(name = "dstat", version, about = "Connects every shard of a bot and reports guild statistics")]
pub struct Cli {
    /// Output JSON instead of a formatted list; useful for programmatic usage
    #[arg(long)]
    pub json: bool,

    /// Disable the live dashboard
    #[arg(long)]
    pub nolive: bool,

    /// Bot token to connect with
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    MissingVariable(String),

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },
}

/// What to print once the fleet is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Live dashboard while running, summary afterwards
    Live,
    /// Summary only
    Summary,
    /// JSON report only
    Json,
}

impl OutputMode {
    /// JSON is forced when stdout is not a terminal
    pub fn resolve(json: bool, nolive: bool, stdout_is_tty: bool) -> Self {
        if json || !stdout_is_tty {
            OutputMode::Json
        } else if nolive {
            OutputMode::Summary
        } else {
            OutputMode::Live
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub token: String,
    pub api_base: String,
    pub output: OutputMode,
    pub refresh_interval: Duration,
    /// `None` when `RUST_LOG` is unset
    pub rust_log: Option<String>,
    pub fleet: FleetConfig,
}

impl RuntimeConfig {
    pub fn load(cli: Cli, stdout_is_tty: bool) -> Result<Self, ConfigError> {
        Self::from_vars(cli, stdout_is_tty, |name| env::var(name).ok())
    }

    pub fn from_vars<F>(cli: Cli, stdout_is_tty: bool, var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = cli
            .token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVariable("DISCORD_TOKEN".to_string()))?;

        let api_base = var("DSTAT_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        if !api_base.starts_with("http://") && !api_base.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                name: "DSTAT_API_BASE".to_string(),
                value: api_base,
            });
        }

        let defaults = FleetConfig::default();
        let fleet = FleetConfig {
            guild_timeout: Duration::from_secs(parse_or(
                &var,
                "DSTAT_GUILD_TIMEOUT_SECS",
                defaults.guild_timeout.as_secs(),
            )?),
            ready_timeout: Duration::from_secs(parse_or(
                &var,
                "DSTAT_READY_TIMEOUT_SECS",
                defaults.ready_timeout.as_secs(),
            )?),
            launch_cooldown: Duration::from_secs(parse_or(
                &var,
                "DSTAT_LAUNCH_COOLDOWN_SECS",
                defaults.launch_cooldown.as_secs(),
            )?),
        };

        let refresh_ms: u64 = parse_or(&var, "DSTAT_REFRESH_MS", 500)?;

        Ok(Self {
            token,
            api_base,
            output: OutputMode::resolve(cli.json, cli.nolive, stdout_is_tty),
            refresh_interval: Duration::from_millis(refresh_ms.max(50)),
            rust_log: var("RUST_LOG"),
            fleet,
        })
    }
}

impl RuntimeConfig {
    /// Log filter for stderr
    ///
    /// The live dashboard shares the terminal with stderr, so only errors are
    /// shown while it runs unless `RUST_LOG` asks for more.
    pub fn log_filter(&self) -> &str {
        match (&self.rust_log, self.output) {
            (Some(filter), _) => filter.as_str(),
            (None, OutputMode::Live) => "error",
            (None, _) => "warn",
        }
    }
}

fn parse_or<F, T>(var: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw,
        }),
    }
}
