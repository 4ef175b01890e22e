//! Server configuration.
//!
//! Settings come from defaults, then the environment, then command-line flags.
//! Variables missing from the process environment are read from a `.env` file
//! when one exists. The data directory override from the environment is only
//! honoured when the path already exists; otherwise the default location is
//! used.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::storage::TransactionOptions;

/// Environment variable naming the bind address.
pub const ENV_BIND: &str = "SURVEY_HTTP_BIND";
/// Environment variable naming the data directory.
pub const ENV_DATA_DIR: &str = "SURVEY_DATA_DIR";
/// Environment variable bounding transaction attempts.
pub const ENV_MAX_ATTEMPTS: &str = "SURVEY_TXN_MAX_ATTEMPTS";

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "./survey-data";

const MAX_ATTEMPTS_RANGE: std::ops::RangeInclusive<u32> = 1..=100;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting could not be parsed or is out of range.
    #[error("invalid value for {name}: {value}")]
    InvalidValue {
        /// Variable or flag name.
        name: String,
        /// The rejected value.
        value: String,
    },

    /// A flag was given without its value.
    #[error("{flag} requires a value")]
    MissingValue {
        /// The flag.
        flag: String,
    },

    /// Unrecognized command-line argument.
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// Which storage backend to run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Volatile, for demos and tests.
    Memory,
    /// Durable data directory.
    Persistent {
        /// Data directory.
        data_dir: PathBuf,
        /// fsync every WAL write.
        sync_on_write: bool,
    },
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to.
    pub addr: SocketAddr,
    /// Storage backend.
    pub backend: Backend,
    /// Transaction retry policy.
    pub transaction: TransactionOptions,
    /// How often the background task checks whether to compact.
    pub compaction_interval: Duration,
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the server.
    Run(ServerConfig),
    /// Print usage and exit.
    Help,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            backend: Backend::Persistent {
                data_dir: PathBuf::from(DEFAULT_DATA_DIR),
                sync_on_write: true,
            },
            transaction: TransactionOptions::default(),
            compaction_interval: Duration::from_secs(30),
        }
    }
}

/// Pick the data directory: an existing override path, else the default.
#[must_use]
pub fn resolve_data_dir(override_path: Option<&str>) -> PathBuf {
    match override_path.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) if Path::new(p).exists() => PathBuf::from(p),
        Some(p) => {
            tracing::warn!(
                path = p,
                fallback = DEFAULT_DATA_DIR,
                "data directory override does not exist, using default"
            );
            PathBuf::from(DEFAULT_DATA_DIR)
        }
        None => PathBuf::from(DEFAULT_DATA_DIR),
    }
}

/// Variables from a `.env` file (`./.env` when `path` is `None`). Missing
/// files yield nothing.
fn dotenv_vars(path: Option<&Path>) -> HashMap<String, String> {
    let iter = match path {
        Some(p) => dotenvy::from_path_iter(p),
        None => dotenvy::dotenv_iter(),
    };
    match iter {
        Ok(iter) => iter
            .filter_map(|item| match item {
                Ok(pair) => Some(pair),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable .env entry");
                    None
                }
            })
            .collect(),
        Err(e) if e.not_found() => HashMap::new(),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable .env file");
            HashMap::new()
        }
    }
}

fn parse_addr(name: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_attempts(name: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|v| MAX_ATTEMPTS_RANGE.contains(v))
        .ok_or_else(|| ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        })
}

impl ServerConfig {
    /// Apply environment variables, read through `lookup`.
    ///
    /// # Errors
    /// Returns `InvalidValue` for unparsable settings.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bind) = lookup(ENV_BIND) {
            config.addr = parse_addr(ENV_BIND, &bind)?;
        }
        config.backend = Backend::Persistent {
            data_dir: resolve_data_dir(lookup(ENV_DATA_DIR).as_deref()),
            sync_on_write: true,
        };
        if let Some(attempts) = lookup(ENV_MAX_ATTEMPTS) {
            config.transaction.max_attempts = parse_attempts(ENV_MAX_ATTEMPTS, &attempts)?;
        }

        Ok(config)
    }

    /// Configuration from the process environment and `./.env`.
    ///
    /// # Errors
    /// See [`ServerConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_file(None)
    }

    /// Configuration from the process environment, falling back to the given
    /// `.env` file (`./.env` when `None`) for unset variables.
    ///
    /// # Errors
    /// See [`ServerConfig::from_lookup`].
    pub fn from_env_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = dotenv_vars(path);
        Self::from_lookup(|name| std::env::var(name).ok().or_else(|| file.get(name).cloned()))
    }

    /// Apply command-line flags (without the program name) on top of `self`.
    ///
    /// # Errors
    /// Unknown flags, missing values and unparsable values.
    pub fn apply_args<I, S>(mut self, args: I) -> Result<Command, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = args.into_iter().map(Into::<String>::into);
        let mut memory = false;
        let mut no_sync = false;
        let mut explicit_dir: Option<PathBuf> = None;

        while let Some(arg) = args.next() {
            let mut value_for = |flag: &str| {
                args.next().ok_or_else(|| ConfigError::MissingValue {
                    flag: flag.to_string(),
                })
            };
            match arg.as_str() {
                "--bind" | "-b" => self.addr = parse_addr("--bind", &value_for("--bind")?)?,
                "--port" | "-p" => {
                    let value = value_for("--port")?;
                    let port = value.trim().parse::<u16>().map_err(|_| {
                        ConfigError::InvalidValue {
                            name: "--port".to_string(),
                            value,
                        }
                    })?;
                    self.addr.set_port(port);
                }
                "--data-dir" | "-d" => explicit_dir = Some(PathBuf::from(value_for("--data-dir")?)),
                "--max-attempts" => {
                    self.transaction.max_attempts =
                        parse_attempts("--max-attempts", &value_for("--max-attempts")?)?;
                }
                "--memory" => memory = true,
                "--no-sync" => no_sync = true,
                "--help" | "-h" => return Ok(Command::Help),
                other => return Err(ConfigError::UnknownArgument(other.to_string())),
            }
        }

        if memory {
            self.backend = Backend::Memory;
        } else if let Backend::Persistent {
            data_dir,
            sync_on_write,
        } = &mut self.backend
        {
            if let Some(dir) = explicit_dir {
                *data_dir = dir;
            }
            if no_sync {
                *sync_on_write = false;
            }
        }

        Ok(Command::Run(self))
    }
}

/// Usage text for the server binary.
pub const USAGE: &str = "\
survey-server - ordered questionnaire HTTP server

USAGE:
    survey-server [OPTIONS]

OPTIONS:
    -b, --bind <ADDR>          Address to listen on [env: SURVEY_HTTP_BIND] [default: 127.0.0.1:8000]
    -p, --port <PORT>          Override only the port
    -d, --data-dir <DIR>       Data directory [env: SURVEY_DATA_DIR] [default: ./survey-data]
        --max-attempts <N>     Transaction attempts, 1-100 [env: SURVEY_TXN_MAX_ATTEMPTS] [default: 5]
        --memory               Keep data in memory only
        --no-sync              Skip fsync after each WAL write
    -h, --help                 Print help information

Unset SURVEY_* variables are also read from ./.env when present.
";
