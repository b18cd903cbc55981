use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Application origin that relative paths are resolved against
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub routing: RoutingConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Namespace name prefix; the version tag is appended
  pub prefix: String,
  /// Bump to cut over to a fresh namespace on next install/activate
  pub version: u32,
  /// Shell resources that must all be fetched during install
  pub shell_assets: Vec<String>,
  /// Page served when a navigation fails on both network and cache
  pub offline_page: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "app-shell".to_string(),
      version: 1,
      shell_assets: vec![
        "/".to_string(),
        "/offline.html".to_string(),
        "/manifest.json".to_string(),
        "/icons/icon-192.png".to_string(),
        "/icons/icon-512.png".to_string(),
      ],
      offline_page: "/offline.html".to_string(),
    }
  }
}

impl CacheConfig {
  /// Identifier of the current namespace, e.g. `app-shell-v3`.
  pub fn namespace(&self) -> String {
    format!("{}-v{}", self.prefix, self.version)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
  /// Path prefixes that identify backend API calls
  pub api_prefixes: Vec<String>,
  /// File extensions treated as static assets (case-insensitive)
  #[serde(deserialize_with = "deserialize_lowercase_set")]
  pub asset_extensions: BTreeSet<String>,
}

impl Default for RoutingConfig {
  fn default() -> Self {
    Self {
      api_prefixes: vec!["/rest/".to_string(), "/api/".to_string()],
      asset_extensions: [
        "css", "js", "mjs", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
    }
  }
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| s.trim_start_matches('.').to_lowercase())
      .collect(),
  )
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Endpoint whose failed mutations are queued and later replayed
  pub endpoint: String,
  /// Sync signal that drains the queue
  pub sync_tag: String,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      endpoint: "/rest/v1/posts".to_string(),
      sync_tag: "sync-posts".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// View opened when the primary action is clicked
  pub root_url: String,
  pub view_icon: String,
  pub dismiss_icon: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "New notification".to_string(),
      icon: "/icons/icon-192.png".to_string(),
      badge: "/icons/badge-72.png".to_string(),
      vibrate: vec![100, 50, 100],
      root_url: "/".to_string(),
      view_icon: "/icons/checkmark.png".to_string(),
      dismiss_icon: "/icons/xmark.png".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
  pub connect_timeout_secs: u64,
  pub user_agent: String,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 30,
      connect_timeout_secs: 10,
      user_agent: concat!("offline-shell/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite database file (default: $XDG_DATA_HOME/offline-shell/offline.db)
  pub path: Option<PathBuf>,
}

impl StorageConfig {
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(p) => Ok(p.clone()),
      None => Ok(data_dir()?.join("offline.db")),
    }
  }
}

/// Per-user data directory for the database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("offline-shell"))
}

impl Config {
  /// Config with every section at its default.
  pub fn new(origin: Url) -> Self {
    Self {
      origin,
      cache: CacheConfig::default(),
      routing: RoutingConfig::default(),
      queue: QueueConfig::default(),
      notifications: NotificationConfig::default(),
      network: NetworkConfig::default(),
      storage: StorageConfig::default(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-shell.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-shell/config.yaml
  ///
  /// An `origin` override replaces the file's origin, and is enough on its own
  /// when no file is found.
  pub fn load(explicit_path: Option<&Path>, origin: Option<Url>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match (path, origin) {
      (Some(p), origin) => {
        let mut config = Self::load_from_path(&p)?;
        if let Some(origin) = origin {
          config.origin = origin;
        }
        Ok(config)
      }
      (None, Some(origin)) => Ok(Self::new(origin)),
      (None, None) => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offline-shell/config.yaml\n\
                 or pass --origin."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offline-shell.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-shell").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Resolve a configured path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid URL {}: {}", path, e))
  }
}
