//! Tracker configuration, read from a TOML file such as:
//!
//! ```toml
//! api_url = "http://localhost:3010"
//! protocol = "delegation"
//! status_path = "/job_status"
//! strict_correlation = false
//! output_dir = "/tmp/proofs"
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;
use anyhow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolRevision {
    // five stages, bids and delegation are announced
    Delegation,

    // numeric job hash, picked then witnessed
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub api_url: String,

    pub protocol: ProtocolRevision,

    pub delegate_path: String,

    pub events_path: String,

    // one-shot status endpoint, not every delegator has one
    pub status_path: Option<String>,

    // a job id mismatch aborts tracking instead of being dropped
    pub strict_correlation: bool,

    pub connect_timeout_secs: u64,

    // proofs land here, `~/.zetina/proofs` if unset
    pub output_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: String::from("http://localhost:3010"),
            protocol: ProtocolRevision::Delegation,
            delegate_path: String::from("/delegate"),
            events_path: String::from("/job_events"),
            status_path: None,
            strict_correlation: false,
            connect_timeout_secs: 10,
            output_dir: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&contents)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn output_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.output_dir {
            Some(dir) => Ok(dir.clone()),

            None => Ok(base_dir()?.join("proofs")),
        }
    }
}

// `~/.zetina/tracker.toml`
pub fn default_path() -> anyhow::Result<PathBuf> {
    Ok(base_dir()?.join("tracker.toml"))
}

fn base_dir() -> anyhow::Result<PathBuf> {
    let home_dir = home::home_dir()
        .ok_or_else(|| anyhow::Error::msg("Home dir is not available"))?;
    Ok(home_dir.join(".zetina"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = Config::from_toml(r#"api_url = "http://delegator:3010""#).unwrap();
        assert_eq!(config.api_url, "http://delegator:3010");
        assert_eq!(config.events_path, "/job_events");
        assert_eq!(config.protocol, ProtocolRevision::Delegation);
        assert_eq!(config.status_path, None);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn full_file_is_read() {
        let config = Config::from_toml(
            r#"
            protocol = "legacy"
            status_path = "/job_status"
            strict_correlation = true
            output_dir = "/tmp/proofs"
            "#,
        )
        .unwrap();
        assert_eq!(config.protocol, ProtocolRevision::Legacy);
        assert_eq!(config.status_path.as_deref(), Some("/job_status"));
        assert!(config.strict_correlation);
        assert_eq!(config.output_dir().unwrap(), PathBuf::from("/tmp/proofs"));
    }

    #[test]
    fn typos_are_rejected() {
        assert!(matches!(
            Config::from_toml("events_pth = \"/x\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::from_toml("protocol = \"v3\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = Config::load(Path::new("/nonexistent/tracker.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tracker.toml"));
    }
}
