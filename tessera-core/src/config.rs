//! Configuration management for Tessera
//!
//! Handles CLI argument parsing, config file loading, and defaults. Flags
//! override values from the config file, which override the defaults.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::dnslink::DEFAULT_RESOLVER;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(about = "Verified content-addressed block store", long_about = None)]
#[command(version)]
pub struct Cli {
    /// TOML config file; flags given on the command line take precedence
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the block database
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// HTTP gateway to race for missing blocks (can be specified multiple times)
    #[arg(long = "gateway", global = true)]
    pub gateways: Vec<String>,

    /// Never fetch from the network
    #[arg(long, global = true)]
    pub offline: bool,

    /// DNS-over-HTTPS endpoint used by `resolve`
    #[arg(long, global = true)]
    pub dns_resolver: Option<String>,

    /// Abort the command after this many seconds
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print a block, fetching it from gateways if it is not stored
    Get {
        cid: String,
        /// Write the block to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Store a file as a single raw block and print its CID
    Put {
        file: PathBuf,
        /// sha2-256, sha2-512, sha3-256, sha3-384, sha3-512 or blake3
        #[arg(long, default_value = "sha2-256")]
        hash: String,
    },

    /// Check whether a block is stored locally
    Has { cid: String },

    /// Remove a block from local storage
    Rm { cid: String },

    /// List stored blocks
    Ls,

    /// Resolve a domain's dnslink record
    Resolve { domain: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub log_level: String,
    pub gateways: Vec<String>,
    pub offline: bool,
    pub dns_resolver: String,
    pub timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            gateways: Vec::new(),
            offline: false,
            dns_resolver: DEFAULT_RESOLVER.to_string(),
            timeout_secs: None,
        }
    }
}

impl Config {
    /// Parse the process arguments into a config and the command to run
    pub fn from_cli() -> Result<(Self, Command), ConfigError> {
        Cli::parse().into_config()
    }

    /// Load config from a TOML file; missing keys take their defaults
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for gateway in &self.gateways {
            if !(gateway.starts_with("http://") || gateway.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "gateway must be an http(s) URL: {}",
                    gateway
                )));
            }
        }

        if self.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("timeout must be at least 1 second".into()));
        }

        Ok(())
    }
}

impl Cli {
    /// Merge flags over the config file (or defaults)
    pub fn into_config(self) -> Result<(Config, Command), ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load_from_file(path)?,
            None => Config::default(),
        };

        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        if !self.gateways.is_empty() {
            config.gateways = self.gateways;
        }
        if self.offline {
            config.offline = true;
        }
        if let Some(dns_resolver) = self.dns_resolver {
            config.dns_resolver = dns_resolver;
        }
        if self.timeout_secs.is_some() {
            config.timeout_secs = self.timeout_secs;
        }

        config.validate()?;
        Ok((config, self.command))
    }
}
