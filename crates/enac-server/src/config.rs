//! # Startup Configuration
//!
//! Command-line flags (with `ENAC_*` environment fallbacks) layered over an
//! optional TOML file. A flag given on the command line always wins over the
//! same key in the file; built-in defaults apply last.
//!
//! ```toml
//! bind = ["localhost:6121", "[::1]:6122"]
//! cert = "cert.pem"
//! key = "key.pem"
//! congestion = "cubic"
//! hystart = "plusplus"
//! qlog = true
//! shutdown = "asymmetric"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use enac_transport::congestion::CongestionOptions;
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_BIND: &str = "localhost:6121";
pub const DEFAULT_CONGESTION: &str = "newreno";
pub const DEFAULT_HYSTART: &str = "standard";

/// enac dual-stack HTTP server.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "enac-server",
    about = "Serve content over TLS/TCP and QUIC on the same address"
)]
pub struct Cli {
    /// Bind targets, comma separated (host:port).
    #[arg(long, env = "ENAC_BIND", value_delimiter = ',')]
    pub bind: Vec<String>,

    /// Debug-level logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Serve static files from this directory instead of synthetic content.
    #[arg(long, env = "ENAC_WWW")]
    pub www: Option<PathBuf>,

    /// Write one qlog trace per QUIC connection into the working directory.
    #[arg(long, default_value_t = false)]
    pub qlog: bool,

    /// PEM certificate chain.
    #[arg(long, env = "ENAC_CERT")]
    pub cert: Option<PathBuf>,

    /// PEM private key.
    #[arg(long, env = "ENAC_KEY")]
    pub key: Option<PathBuf>,

    /// Congestion control algorithm (newreno, cubic).
    #[arg(long, env = "ENAC_CONGESTION")]
    pub congestion: Option<String>,

    /// Slow-start exit heuristic (standard, plusplus, none).
    #[arg(long, env = "ENAC_HYSTART")]
    pub hystart: Option<String>,

    /// What happens to TLS connections when the QUIC side ends first
    /// (asymmetric, symmetric).
    #[arg(long)]
    pub shutdown: Option<String>,

    /// TOML file with the same keys.
    #[arg(long, env = "ENAC_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Keys accepted in the TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<Vec<String>>,
    pub verbose: Option<bool>,
    pub www: Option<PathBuf>,
    pub qlog: Option<bool>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub congestion: Option<String>,
    pub hystart: Option<String>,
    pub shutdown: Option<String>,
}

impl FileConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ─── Shutdown Policy ────────────────────────────────────────────────────────

/// How the stream side reacts when the datagram side terminates first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Stop accepting; in-flight TLS connections drain on their own.
    #[default]
    Asymmetric,
    /// Stop accepting and abort in-flight TLS connections.
    Symmetric,
}

impl FromStr for ShutdownPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asymmetric" => Ok(ShutdownPolicy::Asymmetric),
            "symmetric" => Ok(ShutdownPolicy::Symmetric),
            other => Err(ConfigError::UnknownShutdownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownPolicy::Asymmetric => "asymmetric",
            ShutdownPolicy::Symmetric => "symmetric",
        })
    }
}

// ─── Resolved Configuration ─────────────────────────────────────────────────

/// Fully resolved, validated startup configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: Vec<String>,
    pub verbose: bool,
    pub www: Option<PathBuf>,
    pub qlog: bool,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub congestion: CongestionOptions,
    pub shutdown: ShutdownPolicy,
}

impl ServerConfig {
    /// Resolve the command line, reading the TOML file it names (if any).
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(cli, file)
    }

    /// Merge command line over file over defaults and validate the result.
    pub fn resolve(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let bind = if cli.bind.is_empty() {
            file.bind.unwrap_or_default()
        } else {
            cli.bind
        };
        let mut bind: Vec<String> = bind
            .into_iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if bind.is_empty() {
            bind.push(DEFAULT_BIND.to_string());
        }

        let cert = cli.cert.or(file.cert).ok_or(ConfigError::Missing("cert"))?;
        let key = cli.key.or(file.key).ok_or(ConfigError::Missing("key"))?;

        let congestion = cli
            .congestion
            .or(file.congestion)
            .unwrap_or_else(|| DEFAULT_CONGESTION.to_string());
        let hystart = cli
            .hystart
            .or(file.hystart)
            .unwrap_or_else(|| DEFAULT_HYSTART.to_string());
        let congestion = CongestionOptions::from_names(&congestion, &hystart)?;

        let shutdown = match cli.shutdown.or(file.shutdown) {
            Some(name) => name.parse()?,
            None => ShutdownPolicy::default(),
        };

        Ok(ServerConfig {
            bind,
            verbose: cli.verbose || file.verbose.unwrap_or(false),
            www: cli.www.or(file.www),
            qlog: cli.qlog || file.qlog.unwrap_or(false),
            cert,
            key,
            congestion,
            shutdown,
        })
    }
}
