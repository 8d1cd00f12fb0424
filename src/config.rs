// Configuration management module
// Handles loading, saving, and validating configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Interval in milliseconds between player polls and scrobble decisions
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// MPRIS bus name of the player to follow; the first player found if unset
    #[serde(default)]
    pub player_uri: Option<String>,

    /// Timeout in seconds for requests to the scrobble service
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Where to keep the last scrobbled fingerprint
    #[serde(default)]
    pub dedup_path: Option<PathBuf>,

    /// Maloja server
    pub maloja: MalojaConfig,

    /// Text cleanup configuration
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MalojaConfig {
    pub api_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Enable text cleanup
    pub enabled: bool,

    /// Regex patterns to remove from track/album/artist names
    /// Applied in order, each pattern is removed from the text
    pub patterns: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: vec![
                r"\s*\[Explicit\]".to_string(),
                r"\s*\[Clean\]".to_string(),
                r"\s*\(Explicit\)".to_string(),
                r"\s*\(Clean\)".to_string(),
                r"\s*- Explicit".to_string(),
                r"\s*- Clean".to_string(),
            ],
        }
    }
}

fn default_refresh_interval_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            player_uri: None,
            request_timeout_secs: default_request_timeout_secs(),
            dedup_path: None,
            maloja: MalojaConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Config {
    /// Get the default path to the configuration file
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;

        Ok(config_dir.join(crate::APP_NAME).join("config.toml"))
    }

    /// Load configuration from `path`, or the default location
    ///
    /// A missing file is replaced by a default template, which then fails
    /// validation until the Maloja credentials are filled in.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let default_config = Self::default();
            default_config.save(&config_path)?;
            default_config
                .validate()
                .with_context(|| format!("Fill in the [maloja] section of {:?}", config_path))?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {:?}", config_path))?;

        let config = Self::parse(&content)?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {:?}", config_path))?;

        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content).context("Failed to write config file")?;

        log::info!("Config saved to {:?}", path);

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_ms == 0 {
            anyhow::bail!("refresh_interval_ms must be greater than 0");
        }

        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        if self.maloja.api_url.trim().is_empty() || self.maloja.api_key.trim().is_empty() {
            anyhow::bail!("The config is missing the maloja 'api_url' or 'api_key' field");
        }

        if !self.maloja.api_url.starts_with("http://")
            && !self.maloja.api_url.starts_with("https://")
        {
            anyhow::bail!(
                "maloja api_url must start with http:// or https:// (got {})",
                self.maloja.api_url
            );
        }

        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
