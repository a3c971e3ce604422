use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub app: AppConfig,
  #[serde(default)]
  pub tiles: TileConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Base URL the application is served from; manifest paths resolve against it
  pub base_url: Url,
  /// Prefix for cache partition names
  #[serde(default = "default_cache_prefix")]
  pub cache_prefix: String,
  /// Generation tag. Bump it whenever the shell assets change.
  #[serde(default = "default_version")]
  pub version: String,
  /// Application shell assets, relative to `base_url`
  #[serde(default = "default_shell_assets")]
  pub shell_assets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TileConfig {
  /// Tile server hostname; subdomains such as `a.<host>` match too
  #[serde(default = "default_tile_host")]
  pub host: String,
  /// Maximum number of cached tiles
  #[serde(default = "default_max_tiles")]
  pub max_entries: usize,
}

impl Default for TileConfig {
  fn default() -> Self {
    Self {
      host: default_tile_host(),
      max_entries: default_max_tiles(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Cache database path (default: $XDG_DATA_HOME/tilekeep/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
  /// Overall request timeout; none by default
  pub timeout_secs: Option<u64>,
  pub user_agent: Option<String>,
}

fn default_cache_prefix() -> String {
  "route-aid".to_string()
}

fn default_version() -> String {
  "v6".to_string()
}

fn default_tile_host() -> String {
  "tile.openstreetmap.org".to_string()
}

fn default_max_tiles() -> usize {
  2000
}

fn default_shell_assets() -> Vec<String> {
  [
    "./",
    "./index.html",
    "./leaflet.js",
    "./leaflet.css",
    "./jszip.min.js",
    "./sw.js",
    "./manifest.webmanifest",
    "./images/marker-icon.png",
    "./images/marker-icon-2x.png",
    "./images/marker-shadow.png",
    "./icons/icon-192.png",
    "./icons/icon-512.png",
    "./icons/icon-1024.png",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tilekeep.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tilekeep/config.yaml
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
        "No configuration file found. Create one at ~/.config/tilekeep/config.yaml\n\
                 At minimum it needs `app.base_url`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tilekeep.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tilekeep").join("config.yaml");
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

  /// Parse and validate a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.app.base_url.cannot_be_a_base() {
      return Err(eyre!("app.base_url must be a hierarchical URL: {}", self.app.base_url));
    }
    if self.app.version.trim().is_empty() {
      return Err(eyre!("app.version must not be empty"));
    }
    if self.app.cache_prefix.trim().is_empty() {
      return Err(eyre!("app.cache_prefix must not be empty"));
    }
    if self.tiles.host.trim().is_empty() {
      return Err(eyre!("tiles.host must not be empty"));
    }
    if self.tiles.max_entries == 0 {
      return Err(eyre!("tiles.max_entries must be greater than zero"));
    }
    Ok(())
  }

  /// Tile cache bound.
  pub fn max_tiles(&self) -> Result<NonZeroUsize> {
    NonZeroUsize::new(self.tiles.max_entries)
      .ok_or_else(|| eyre!("tiles.max_entries must be greater than zero"))
  }

  /// Get the cache database path.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.storage.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tilekeep").join("cache.db"))
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.network.timeout_secs.map(Duration::from_secs)
  }

  pub fn user_agent(&self) -> String {
    self
      .network
      .user_agent
      .clone()
      .unwrap_or_else(|| format!("tilekeep/{}", env!("CARGO_PKG_VERSION")))
  }
}
