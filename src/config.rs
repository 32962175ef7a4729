//! TOML file configuration for CLI defaults.
//!
//! The file is optional. Values it sets sit between the built-in defaults
//! and explicitly passed CLI flags.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::resolver::ResolveStrategy;

/// Directory name under the user config root.
const CONFIG_DIR_NAME: &str = "sankaku-ripper";

/// Config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Upper bound for the rate-limit interval, in milliseconds.
pub const MAX_RATE_LIMIT_MS: u64 = 60_000;

/// Upper bound for download attempts per asset.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Errors raised while loading the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unknown keys.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {value}. Expected {expected}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// Rejected value.
        value: String,
        /// Accepted values.
        expected: &'static str,
    },
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerbositySetting {
    /// `info` level.
    Default,
    /// `debug` level.
    Verbose,
    /// `error` level.
    Quiet,
    /// `trace` level.
    Debug,
}

impl VerbositySetting {
    /// Returns the tracing filter level for this setting.
    #[must_use]
    pub fn log_level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// TOML-backed defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Root directory album folders are created in.
    pub output_dir: Option<PathBuf>,
    /// Minimum delay between requests to one host, in milliseconds.
    pub rate_limit_ms: Option<u64>,
    /// Default resolution strategy.
    pub strategy: Option<ResolveStrategy>,
    /// Extension assumed by guessed URLs; empty keeps the thumbnail's.
    pub assumed_extension: Option<String>,
    /// Download attempts per asset.
    pub max_retries: Option<u32>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Default verbosity.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown keys,
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates values against the same ranges the CLI accepts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(rate_limit) = self.rate_limit_ms
            && rate_limit > MAX_RATE_LIMIT_MS
        {
            return Err(ConfigError::Invalid {
                field: "rate_limit_ms",
                value: rate_limit.to_string(),
                expected: "0..=60000",
            });
        }
        if let Some(retries) = self.max_retries
            && retries > MAX_RETRIES_LIMIT
        {
            return Err(ConfigError::Invalid {
                field: "max_retries",
                value: retries.to_string(),
                expected: "0..=10",
            });
        }
        if let Some(extension) = self.assumed_extension.as_deref()
            && !is_valid_extension(extension)
        {
            return Err(ConfigError::Invalid {
                field: "assumed_extension",
                value: extension.to_string(),
                expected: "an alphanumeric extension without a dot, or \"\"",
            });
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        Ok(())
    }
}

/// Returns whether `extension` is acceptable as an assumed extension.
///
/// Empty means "keep the thumbnail's extension".
#[must_use]
pub fn is_valid_extension(extension: &str) -> bool {
    extension.len() <= 8 && extension.chars().all(|c| c.is_ascii_alphanumeric())
}

fn validate_timeout_secs(field: &'static str, value: Option<u64>) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::Invalid {
            field,
            value: value.to_string(),
            expected: "1..=3600",
        });
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    /// Path that was consulted, if one could be determined.
    pub path: Option<PathBuf>,
    /// Parsed file config when a file was found.
    pub config: Option<FileConfig>,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/sankaku-ripper/config.toml`
/// 2. `$HOME/.config/sankaku-ripper/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist. The default path is optional: when it is
/// missing, no config is loaded.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, parsed or validated.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let Some(path) = resolve_default_config_path() else {
                return Ok(LoadedConfig::default());
            };
            if !path.exists() {
                debug!(path = %path.display(), "no config file");
                return Ok(LoadedConfig {
                    path: Some(path),
                    config: None,
                });
            }
            path
        }
    };

    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let config = FileConfig::from_toml_str(&raw, &path)?;
    debug!(path = %path.display(), "loaded config file");
    Ok(LoadedConfig {
        path: Some(path),
        config: Some(config),
    })
}
