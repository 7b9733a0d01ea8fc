use std::{fmt, io::IsTerminal, net::SocketAddr, path::PathBuf, str::FromStr};

use anyhow::anyhow;
use clap::{Parser, ValueEnum};
use config::Config;
use logforth::filter::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "AIPC Open Gateway", version, long_about = concat!("AOG v", env!("CARGO_PKG_VERSION")))]
pub struct Args {
    /// Loopback address and port the gateway binds to. Default: 127.0.0.1:16688
    #[arg(short, long, env = "AOG_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,
    /// Path to the TOML configuration file, ignored when missing
    #[arg(long, short, env = "AOG_CONFIG_PATH", default_value = "./aog.toml")]
    pub config: PathBuf,
    /// Directory holding the registry database and the PID file
    #[arg(long, env = "AOG_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
    /// Verbosity of the gateway crates; dependencies stay at warn
    #[arg(long = "log", env = "AOG_LOG", default_value_t = LogLevel::default())]
    pub log_level: LogLevel,
    /// Format of the log lines
    #[arg(long, env = "AOG_LOG_STYLE", default_value_t = LogStyle::default())]
    pub log_style: LogStyle,
}

impl Args {
    pub fn config(&self) -> anyhow::Result<Config> {
        let mut config = if self.config.exists() {
            Config::load(&self.config)?
        } else {
            Config::default()
        };

        if let Some(data_dir) = &self.data_dir {
            config.store.data_dir = data_dir.clone();
        }

        Ok(config)
    }
}

/// Writes the name clap parses the value from.
fn write_value_name(value: &impl ValueEnum, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value.to_possible_value() {
        Some(possible) => f.write_str(possible.get_name()),
        None => Ok(()),
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogStyle {
    /// ANSI colored levels, the default on a terminal
    Color,
    /// Plain text, the default when stdout is redirected
    Text,
    /// One JSON object per line
    Json,
}

impl Default for LogStyle {
    fn default() -> Self {
        if std::io::stdout().is_terminal() {
            LogStyle::Color
        } else {
            LogStyle::Text
        }
    }
}

impl fmt::Display for LogStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value_name(self, f)
    }
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Crates whose logs follow the selected level; everything else stays at warn.
const WORKSPACE_CRATES: [&str; 9] = [
    "aog",
    "config",
    "convert",
    "flavor",
    "gateway",
    "header_rules",
    "registry",
    "server",
    "telemetry",
];

impl LogLevel {
    pub fn env_filter(self) -> anyhow::Result<EnvFilter> {
        let directives = if self == LogLevel::Off {
            "off".to_string()
        } else {
            WORKSPACE_CRATES
                .iter()
                .fold(String::from("warn"), |directives, name| format!("{directives},{name}={self}"))
        };

        EnvFilter::from_str(&directives).map_err(|error| anyhow!("invalid log filter '{directives}': {error:?}"))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value_name(self, f)
    }
}
