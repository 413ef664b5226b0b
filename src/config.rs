use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
  /// Whole-request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Upper bound on version probes, in seconds
  #[serde(default = "default_probe_timeout_secs")]
  pub probe_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_probe_timeout_secs() -> u64 {
  5
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn probe_timeout(&self) -> Duration {
    Duration::from_secs(self.probe_timeout_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// Database location (defaults to $XDG_DATA_HOME/fintrack/cache.db)
  pub path: Option<PathBuf>,
  /// Keep the cache in memory only
  #[serde(default)]
  pub in_memory: bool,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fintrack.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fintrack/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/fintrack/config.yaml\n\
                 with at least:\n\napi:\n  url: https://your-fintrack-server"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fintrack.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fintrack").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    url::Url::parse(&config.api.url)
      .map_err(|e| eyre!("Invalid api.url '{}': {}", config.api.url, e))?;
    Ok(config)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks FINTRACK_TOKEN first, then FINTRACK_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("FINTRACK_TOKEN")
      .or_else(|_| std::env::var("FINTRACK_API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set FINTRACK_TOKEN or FINTRACK_API_TOKEN environment variable.")
      })
  }

  /// Data directory for the cache database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("fintrack"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  url: https://fintrack.example.com\n").unwrap();

    assert_eq!(config.api.timeout(), Duration::from_secs(30));
    assert_eq!(config.api.probe_timeout(), Duration::from_secs(5));
    assert!(config.cache.path.is_none());
    assert!(!config.cache.in_memory);
  }

  #[test]
  fn test_full_config() {
    let config = Config::parse(
      r#"
api:
  url: https://fintrack.example.com
  timeout_secs: 10
  probe_timeout_secs: 2
cache:
  path: /tmp/fintrack.db
  in_memory: true
"#,
    )
    .unwrap();

    assert_eq!(config.api.probe_timeout(), Duration::from_secs(2));
    assert_eq!(config.cache.path, Some(PathBuf::from("/tmp/fintrack.db")));
    assert!(config.cache.in_memory);
  }

  #[test]
  fn test_invalid_url_is_rejected() {
    assert!(Config::parse("api:\n  url: not a url\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_errors() {
    let err = Config::load(Some(Path::new("/nonexistent/fintrack.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
