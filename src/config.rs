use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub agent: AgentConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub network: NetworkConfig,
}

/// Immutable policy handed to the agent at construction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
  /// Name of the current cache generation; changing it starts a new generation
  pub cache_name: String,
  /// Origin the app is served from; relative seed paths resolve against it
  pub origin: String,
  /// Path prefix the app lives under (e.g., "/Radars/")
  pub base_path: String,
  /// App shell stored at install time
  pub seed_urls: Vec<String>,
  /// URL substrings that are always fetched live and never cached
  pub bypass_patterns: Vec<String>,
  /// Document served to navigations that miss both network and cache
  pub navigation_fallback: String,
}

impl Default for AgentConfig {
  fn default() -> Self {
    let base = "/Radars/";
    Self {
      cache_name: "radar-detector-v2.7".to_string(),
      origin: "http://localhost/".to_string(),
      base_path: base.to_string(),
      seed_urls: vec![
        base.to_string(),
        format!("{}index.html", base),
        format!("{}manifest.webmanifest", base),
        format!("{}icons/icon-192.png", base),
        format!("{}icons/icon-512.png", base),
      ],
      bypass_patterns: vec![
        "api".to_string(),
        "lufop.net".to_string(),
        "blitzer.de".to_string(),
      ],
      navigation_fallback: format!("{}index.html", base),
    }
  }
}

impl AgentConfig {
  /// Resolve a path (or absolute URL) against the configured origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid URL '{}' relative to {}: {}", path, self.origin, e))
  }

  fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Absolute URLs of the app shell.
  pub fn seed_resources(&self) -> Result<Vec<Url>> {
    self.seed_urls.iter().map(|u| self.resolve(u)).collect()
  }

  fn validate(&self) -> Result<()> {
    if self.cache_name.trim().is_empty() {
      return Err(eyre!("agent.cache_name must not be empty"));
    }
    if !self.base_path.starts_with('/') || !self.base_path.ends_with('/') {
      return Err(eyre!(
        "agent.base_path must begin and end with '/': {}",
        self.base_path
      ));
    }
    if !matches!(self.origin_url()?.scheme(), "http" | "https") {
      return Err(eyre!("agent.origin must be an http(s) URL: {}", self.origin));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Cache database path (default: $XDG_DATA_HOME/radar-offline/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub user_agent: String,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      user_agent: concat!("radar-offline/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./radar-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/radar-offline/config.yaml
  /// 4. Built-in defaults
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
    // Check current directory
    let local = PathBuf::from("radar-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("radar-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml_str(&contents)
      .map_err(|e| eyre!("Failed to load config file {}: {}", path.display(), e))
  }

  pub fn from_yaml_str(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.agent.validate()?;
    Ok(config)
  }
}
