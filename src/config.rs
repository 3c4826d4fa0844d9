use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the cached app is served from; requests outside it are never cached
  #[serde(default = "default_origin")]
  pub origin: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub store: StoreConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      cache: CacheConfig::default(),
      notifications: NotificationConfig::default(),
      sync: SyncConfig::default(),
      store: StoreConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Generation names are `<prefix>-<version>`
  pub prefix: String,
  pub version: String,
  /// Root-relative paths populated on install
  pub manifest: Vec<String>,
  /// Path substrings that are never intercepted
  pub bypass: Vec<String>,
  /// Document served to HTML navigations when the network is down
  pub offline_document: String,
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "study-resources".to_string(),
      version: "v1".to_string(),
      manifest: [
        "/",
        "/index.html",
        "/styles.css",
        "/script.js",
        "/db.js",
        "/pdf-viewer.js",
        "/manifest.json",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      bypass: vec!["/api/".to_string(), "/browser-sync/".to_string()],
      offline_document: "/index.html".to_string(),
      database: None,
    }
  }
}

impl CacheConfig {
  pub fn generation_name(&self) -> String {
    format!("{}-{}", self.prefix, self.version)
  }
}

/// Defaults used for every push notification field the payload leaves out
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Study Resources".to_string(),
      body: "New study resources are available!".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/icon-72x72.png".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Resource manifest refreshed by background sync
  pub resources_path: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      resources_path: "/data/resources.json".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  pub database: Option<PathBuf>,
}

fn default_origin() -> String {
  "http://localhost:8080/".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./studyshelf.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/studyshelf/config.yaml
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
      None => Config::default(),
    };

    config.with_env_overrides()
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("studyshelf.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("studyshelf").join("config.yaml");
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

  fn from_yaml(contents: &str) -> Result<Self> {
    // An empty document deserializes to unit, not to an empty map
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    config.origin_url()?;
    Ok(config)
  }

  /// The configured origin as a parsed URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Apply STUDYSHELF_ORIGIN if it is set.
  fn with_env_overrides(self) -> Result<Self> {
    match std::env::var("STUDYSHELF_ORIGIN") {
      Ok(origin) => {
        let config = Config { origin, ..self };
        config.origin_url()?;
        Ok(config)
      }
      Err(_) => Ok(self),
    }
  }

  /// Root directory for databases and logs.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("studyshelf"))
  }

  pub fn cache_database_path(&self) -> Result<PathBuf> {
    match &self.cache.database {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("cache.db")),
    }
  }

  pub fn store_database_path(&self) -> Result<PathBuf> {
    match &self.store.database {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("store.db")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::from_yaml("").unwrap();
    assert_eq!(config.cache.generation_name(), "study-resources-v1");
    assert_eq!(config.origin_url().unwrap().as_str(), "http://localhost:8080/");
    assert!(config.cache.manifest.contains(&"/index.html".to_string()));
  }

  #[test]
  fn test_partial_sections_keep_other_defaults() {
    let yaml = r#"
origin: "https://study.example.org"
cache:
  version: "v7"
  bypass: ["/live/"]
notifications:
  title: "Exam week"
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.cache.generation_name(), "study-resources-v7");
    assert_eq!(config.cache.bypass, vec!["/live/".to_string()]);
    assert_eq!(config.cache.offline_document, "/index.html");
    assert_eq!(config.notifications.title, "Exam week");
    assert_eq!(config.notifications.body, "New study resources are available!");
    assert_eq!(config.sync.resources_path, "/data/resources.json");
  }

  #[test]
  fn test_invalid_origin_is_rejected() {
    assert!(Config::from_yaml("origin: \"not a url\"").is_err());
  }
}
