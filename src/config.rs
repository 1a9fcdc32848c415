use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::DEFAULT_TTL_MINUTES;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub github: GithubConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Where the store and logs live (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
  #[serde(default)]
  pub notifications: NotificationsConfig,
  #[serde(default)]
  pub oauth: OAuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
  #[serde(default = "default_api_url")]
  pub api_url: String,
}

impl Default for GithubConfig {
  fn default() -> Self {
    Self {
      api_url: default_api_url(),
    }
  }
}

fn default_api_url() -> String {
  DEFAULT_API_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_ttl_minutes")]
  pub ttl_minutes: i64,
  /// Off keeps everything in memory for the current run
  #[serde(default = "default_true")]
  pub enabled: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_minutes: default_ttl_minutes(),
      enabled: true,
    }
  }
}

fn default_ttl_minutes() -> i64 {
  DEFAULT_TTL_MINUTES
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationsConfig {
  /// Slack/Discord-compatible incoming webhook
  pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthConfig {
  pub client_id: Option<String>,
  /// Prefer GFIT_OAUTH_CLIENT_SECRET over putting this in the file
  pub client_secret: Option<String>,
  /// GitHub App id, for installation tokens
  pub app_id: Option<String>,
  pub private_key_path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./gfit.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/gfit/config.yaml
  ///
  /// Without any file the defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("gfit.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("gfit").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    config
      .cache_ttl()
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;
    Ok(config)
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file is valid and means defaults
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Issue cache TTL. Negative or out-of-range minutes are rejected.
  pub fn cache_ttl(&self) -> Result<chrono::Duration> {
    let minutes = self.cache.ttl_minutes;
    if minutes < 0 {
      return Err(eyre!("cache.ttl_minutes must not be negative (got {})", minutes));
    }
    chrono::Duration::try_minutes(minutes)
      .ok_or_else(|| eyre!("cache.ttl_minutes is too large (got {})", minutes))
  }

  pub fn data_dir(&self) -> Result<PathBuf> {
    match &self.data_dir {
      Some(dir) => Ok(dir.clone()),
      None => dirs::data_dir()
        .map(|d| d.join("gfit"))
        .ok_or_else(|| eyre!("Could not determine a data directory; set data_dir in the config")),
    }
  }

  /// Get the GitHub token from environment variables.
  ///
  /// Checks GFIT_GITHUB_TOKEN first, then GITHUB_TOKEN as fallback.
  pub fn env_token() -> Option<String> {
    std::env::var("GFIT_GITHUB_TOKEN")
      .or_else(|_| std::env::var("GITHUB_TOKEN"))
      .ok()
      .filter(|t| !t.is_empty())
  }

  /// OAuth client secret, GFIT_OAUTH_CLIENT_SECRET winning over the file.
  pub fn client_secret(&self) -> Option<String> {
    std::env::var("GFIT_OAUTH_CLIENT_SECRET")
      .ok()
      .filter(|s| !s.is_empty())
      .or_else(|| self.oauth.client_secret.clone())
  }
}
