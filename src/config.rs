use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub assets: AssetsConfig,
  pub cache: CacheConfig,
  pub server: ServerConfig,
  /// Where the worker database and log files live (defaults to the XDG data dir)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Origin of the REST data API; requests to this origin are data requests
  pub origin: Url,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
  /// Origin serving the page shell and static files
  pub origin: Url,
  /// Paths fetched and cached when the worker is installed
  pub precache: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix shared by every cache namespace of this application
  pub prefix: String,
  /// Build version; namespaces of other versions are purged on activation
  pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub listen: SocketAddr,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api: ApiConfig::default(),
      assets: AssetsConfig::default(),
      cache: CacheConfig::default(),
      server: ServerConfig::default(),
      data_dir: None,
    }
  }
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      origin: Url::parse("http://localhost:1337/").expect("valid default URL"),
    }
  }
}

impl Default for AssetsConfig {
  fn default() -> Self {
    Self {
      origin: Url::parse("http://localhost:8000/").expect("valid default URL"),
      precache: [
        "/",
        "index.html",
        "restaurant.html",
        "css/styles.css",
        "js/index.js",
        "js/main.js",
        "js/restaurant_info.js",
        "js/register-sw.js",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "restaurant-reviews".to_string(),
      version: "v1.0.1".to_string(),
    }
  }
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./restview.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/restview/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    config.with_env_overrides()
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("restview.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("restview").join("config.yaml");
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

    if config.cache.prefix.is_empty() || config.cache.version.is_empty() {
      return Err(eyre!("cache.prefix and cache.version must not be empty"));
    }

    Ok(config)
  }

  /// Apply RESTVIEW_API_ORIGIN and RESTVIEW_DATA_DIR.
  fn with_env_overrides(mut self) -> Result<Self> {
    if let Ok(origin) = std::env::var("RESTVIEW_API_ORIGIN") {
      self.api.origin = Url::parse(&origin)
        .map_err(|e| eyre!("Invalid RESTVIEW_API_ORIGIN '{}': {}", origin, e))?;
    }
    if let Ok(dir) = std::env::var("RESTVIEW_DATA_DIR") {
      self.data_dir = Some(PathBuf::from(dir));
    }
    Ok(self)
  }

  /// Directory for the worker database and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("restview"))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("worker.db"))
  }

  /// Name of the namespace holding page assets for the current version.
  pub fn static_cache_name(&self) -> String {
    format!("{}-static-{}", self.cache.prefix, self.cache.version)
  }

  /// Name of the namespace holding images for the current version.
  pub fn images_cache_name(&self) -> String {
    format!("{}-images-{}", self.cache.prefix, self.cache.version)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.api.origin.port(), Some(1337));
    assert_eq!(
      config.static_cache_name(),
      "restaurant-reviews-static-v1.0.1"
    );
    assert_eq!(
      config.images_cache_name(),
      "restaurant-reviews-images-v1.0.1"
    );
    assert!(config.assets.precache.contains(&"css/styles.css".to_string()));
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = Config::parse(
      r#"
api:
  origin: http://localhost:1338/
cache:
  version: v2
"#,
    )
    .unwrap();

    assert_eq!(config.api.origin.port(), Some(1338));
    assert_eq!(config.cache.prefix, "restaurant-reviews");
    assert_eq!(config.static_cache_name(), "restaurant-reviews-static-v2");
    assert_eq!(config.server.listen.port(), 8080);
  }

  #[test]
  fn test_empty_version_is_rejected() {
    assert!(Config::parse("cache:\n  version: \"\"\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let missing = Path::new("/definitely/not/here/restview.yaml");
    assert!(Config::load(Some(missing)).is_err());
  }
}
