use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Application configuration, loaded once at startup and shared read-only.
///
/// Every field has a built-in default mirroring the reference deployment,
/// so the binary runs without a config file present.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the app shell. Requests matching it are served cache-first.
  pub origin: String,
  pub cache: CacheConfig,
  /// App-shell URLs (relative to the origin) precached at install time.
  pub precache_manifest: Vec<String>,
  /// Hostnames of the data APIs served network-first (exact or subdomain).
  #[serde(deserialize_with = "deserialize_lowercase_vec")]
  pub api_hosts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Name of the versioned precache generation.
  pub precache_name: String,
  /// Name of the runtime generation for API responses.
  pub runtime_name: String,
  /// What to answer when an API fetch fails and nothing is cached.
  pub offline: OfflineMode,
}

/// Fallback behavior for an API request that fails with no cached copy.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OfflineMode {
  /// Propagate the network error to the caller.
  Passthrough,
  /// Synthesize a JSON body indicating offline state.
  #[default]
  JsonBody,
}

fn deserialize_lowercase_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "https://jannah.app".to_string(),
      cache: CacheConfig::default(),
      precache_manifest: [
        "/",
        "/index.html",
        "/manifest.json",
        "/icon-192.png",
        "/icon-512.png",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      api_hosts: vec!["api.aladhan.com".to_string(), "api.alquran.cloud".to_string()],
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      precache_name: "app-shell-v1.0.0".to_string(),
      runtime_name: "runtime-v1".to_string(),
      offline: OfflineMode::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./mihrab.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/mihrab/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
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
    let local = PathBuf::from("mihrab.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("mihrab").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Parsed app-shell origin.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Whether a hostname belongs to the API allow-list.
  ///
  /// Matches an allow-listed host exactly or as a subdomain, never as an
  /// arbitrary substring.
  pub fn is_api_host(&self, host: &str) -> bool {
    let host = host.to_lowercase();
    self
      .api_hosts
      .iter()
      .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)))
  }

  /// Precache manifest entries resolved against the app origin.
  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    let origin = self.origin_url()?;
    self
      .precache_manifest
      .iter()
      .map(|entry| {
        origin
          .join(entry)
          .map_err(|e| eyre!("Invalid manifest entry '{}': {}", entry, e))
      })
      .collect()
  }
}
