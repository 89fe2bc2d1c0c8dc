//! Client configuration.
//!
//! Configuration is read from `config.toml` in the platform configuration
//! directory, then overridden by environment variables:
//!
//! - `IDFORGE_REGION` - region code (`na`, `eu`, `ca`, `ap`, `au`)
//! - `IDFORGE_API_URL` - API base URL override
//! - `IDFORGE_TOKEN_BUFFER_SECONDS` - seconds before expiry a token is refreshed

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

pub const REGION_VAR: &str = "IDFORGE_REGION";
pub const API_URL_VAR: &str = "IDFORGE_API_URL";
pub const TOKEN_BUFFER_VAR: &str = "IDFORGE_TOKEN_BUFFER_SECONDS";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },

    #[error("configuration directory not available")]
    ConfigDirUnavailable,
}

/// Geographic deployment of the identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Region {
    #[default]
    #[serde(rename = "na")]
    NorthAmerica,
    #[serde(rename = "eu")]
    Europe,
    #[serde(rename = "ca")]
    Canada,
    #[serde(rename = "ap")]
    AsiaPacific,
    #[serde(rename = "au")]
    Australia,
}

impl Region {
    fn tld(self) -> &'static str {
        match self {
            Self::NorthAmerica => "com",
            Self::Europe => "eu",
            Self::Canada => "ca",
            Self::AsiaPacific => "asia",
            Self::Australia => "com.au",
        }
    }

    /// Short code used in config files and environment variables.
    pub fn code(self) -> &'static str {
        match self {
            Self::NorthAmerica => "na",
            Self::Europe => "eu",
            Self::Canada => "ca",
            Self::AsiaPacific => "ap",
            Self::Australia => "au",
        }
    }

    /// Authorization server host for this region.
    pub fn auth_base_url(self) -> String {
        format!("https://auth.pingone.{}", self.tld())
    }

    /// Management API base URL for this region.
    pub fn api_base_url(self) -> String {
        format!("https://api.pingone.{}/v1", self.tld())
    }

    /// Client-credentials token endpoint for an environment.
    pub fn token_endpoint(self, environment_id: &str) -> String {
        format!("{}/{}/as/token", self.auth_base_url(), environment_id)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Region {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "na" | "com" | "us" => Ok(Self::NorthAmerica),
            "eu" => Ok(Self::Europe),
            "ca" => Ok(Self::Canada),
            "ap" | "asia" => Ok(Self::AsiaPacific),
            "au" => Ok(Self::Australia),
            other => Err(ConfigError::InvalidValue {
                name: "region".to_string(),
                message: format!("unknown region '{}' (expected na, eu, ca, ap or au)", other),
            }),
        }
    }
}

/// Retry tuning as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub region: Region,

    /// Overrides the region's API base URL.
    pub api_base_url: Option<String>,

    pub token_buffer_seconds: u64,

    pub cache_ttl_seconds: u64,

    pub retry: RetrySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: Region::default(),
            api_base_url: None,
            token_buffer_seconds: 300,
            cache_ttl_seconds: 300,
            retry: RetrySettings::default(),
        }
    }
}

impl Config {
    /// Default configuration directory.
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        project_dirs()
            .map(|d| d.config_dir().to_path_buf())
            .ok_or(ConfigError::ConfigDirUnavailable)
    }

    /// Load `config.toml` from the default directory and apply environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_dir()?.join("config.toml");
        let mut config = Self::load_from_path(&path)?;
        config.apply_overrides(std::env::vars())?;
        Ok(config)
    }

    /// Load a config file, returning defaults when it does not exist.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `IDFORGE_*` overrides from the given variables.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().trim().to_string()))
            .filter(|(_, v)| !v.is_empty())
            .collect();

        if let Some(region) = vars.get(REGION_VAR) {
            self.region = region.parse()?;
        }

        if let Some(url) = vars.get(API_URL_VAR) {
            url::Url::parse(url).map_err(|e| ConfigError::InvalidValue {
                name: API_URL_VAR.to_string(),
                message: e.to_string(),
            })?;
            self.api_base_url = Some(url.clone());
        }

        if let Some(buffer) = vars.get(TOKEN_BUFFER_VAR) {
            self.token_buffer_seconds =
                buffer.parse().map_err(|e: std::num::ParseIntError| {
                    ConfigError::InvalidValue {
                        name: TOKEN_BUFFER_VAR.to_string(),
                        message: e.to_string(),
                    }
                })?;
        }

        Ok(())
    }

    /// Effective API base URL.
    pub fn api_base_url(&self) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| self.region.api_base_url())
    }

    pub fn token_buffer(&self) -> Duration {
        Duration::from_secs(self.token_buffer_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "idforge", "idforge")
}
