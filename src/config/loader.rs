//! Reading the worker configuration.
//!
//! A config file is read once at startup; every error names the file it came
//! from so a supervisor log line is enough to find the problem.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::WorkerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Why a configuration could not be accepted.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Read { path: PathBuf, source: std::io::Error },
    /// The document is not valid TOML for the schema.
    Parse { origin: Origin, source: toml::de::Error },
    /// The document parsed but failed validation.
    Invalid { origin: Origin, errors: Vec<ValidationError> },
}

/// Where a configuration document came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    File(PathBuf),
    Inline,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::File(path) => write!(f, "{}", path.display()),
            Origin::Inline => write!(f, "<inline config>"),
        }
    }
}

impl ConfigError {
    /// Validation failures, if that is what went wrong.
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            ConfigError::Invalid { errors, .. } => errors,
            _ => &[],
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            ConfigError::Parse { origin, source } => {
                write!(f, "{} is not a valid worker config: {}", origin, source)
            }
            ConfigError::Invalid { origin, errors } => {
                write!(f, "{} has {} problem(s): ", origin, errors.len())?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { .. } => None,
        }
    }
}

fn parse(content: &str, origin: Origin) -> Result<WorkerConfig, ConfigError> {
    let config: WorkerConfig = match toml::from_str(content) {
        Ok(config) => config,
        Err(source) => return Err(ConfigError::Parse { origin, source }),
    };
    validate_config(&config).map_err(|errors| ConfigError::Invalid { origin, errors })?;
    Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<WorkerConfig, ConfigError> {
    parse(content, Origin::Inline)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<WorkerConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse(&content, Origin::File(path.to_path_buf()))?;
    tracing::debug!(path = %path.display(), "Configuration loaded");
    Ok(config)
}
