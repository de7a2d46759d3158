//! Configuration for the remote endpoint, batch sizing and worker pools.

use std::{
   fs,
   path::{Path, PathBuf},
   sync::OnceLock,
};

use directories::BaseDirs;
use figment::{
   Figment,
   providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub const MAX_BATCH_BYTES_CAP: u64 = 64 * 1024 * 1024;
pub const MAX_FILE_SIZE_BYTES_CAP: u64 = 256 * 1024 * 1024;
pub const MAX_CONCURRENCY_CAP: usize = 256;

/// Name of the per-repository metadata directory.
pub const METADATA_DIR: &str = ".insight";
/// Name of the per-repository ignore-rules file.
pub const IGNORE_FILE: &str = ".insightignore";
const APP_DIR: &str = "insight";

/// Name of the optional per-repository config override.
pub const REPO_CONFIG_FILE: &str = ".insight.toml";

/// Application configuration loaded from config files and environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
   pub api_base_url:         String,
   pub request_timeout_ms:   u64,
   pub max_batch_bytes:      u64,
   pub max_file_size_bytes:  u64,
   pub read_concurrency:     usize,
   pub upload_concurrency:   usize,
   pub allowed_extensions:   Vec<String>,
   pub validate_before_sync: bool,
}

impl Default for Config {
   fn default() -> Self {
      Self {
         api_base_url:         "http://127.0.0.1:5000".to_string(),
         request_timeout_ms:   120_000,
         max_batch_bytes:      10 * 1024 * 1024,
         max_file_size_bytes:  5 * 1024 * 1024,
         read_concurrency:     default_read_concurrency(),
         upload_concurrency:   16,
         allowed_extensions:   Vec::new(),
         validate_before_sync: true,
      }
   }
}

fn default_read_concurrency() -> usize {
   (num_cpus::get() * 2).clamp(4, 64)
}

impl Config {
   pub fn load() -> Self {
      Self::load_with_repo_path(None)
   }

   pub fn load_with_repo(root: &Path) -> Self {
      Self::load_with_repo_path(Some(root))
   }

   fn load_with_repo_path(repo_root: Option<&Path>) -> Self {
      Self::figment(repo_root)
         .extract()
         .inspect_err(|e| tracing::warn!("failed to parse config: {e}"))
         .unwrap_or_default()
   }

   fn figment(repo_root: Option<&Path>) -> Figment {
      let mut figment = Figment::from(Serialized::defaults(Self::default()));

      if let Some(config_path) = ensure_global_config() {
         figment = figment.merge(Toml::file(config_path));
      }

      if let Some(root) = repo_root {
         let repo_path = repo_config_path(root);
         if repo_path.exists() {
            figment = figment.merge(Toml::file(repo_path));
         }
      }

      figment.merge(Env::prefixed("INSIGHT_").lowercase(true))
   }

   fn create_default_config(path: &Path) {
      if let Some(parent) = path.parent() {
         let _ = fs::create_dir_all(parent);
      }
      if let Ok(toml) = toml::to_string_pretty(&Self::default()) {
         let _ = fs::write(path, toml);
      }
   }

   pub fn effective_max_batch_bytes(&self) -> u64 {
      self.max_batch_bytes.clamp(1, MAX_BATCH_BYTES_CAP)
   }

   pub fn effective_max_file_size_bytes(&self) -> u64 {
      self.max_file_size_bytes.clamp(1, MAX_FILE_SIZE_BYTES_CAP)
   }

   pub fn effective_read_concurrency(&self) -> usize {
      self.read_concurrency.clamp(1, MAX_CONCURRENCY_CAP)
   }

   pub fn effective_upload_concurrency(&self) -> usize {
      self.upload_concurrency.clamp(1, MAX_CONCURRENCY_CAP)
   }
}

/// Returns the global configuration instance
pub fn get() -> &'static Config {
   CONFIG.get_or_init(Config::load)
}

/// Initializes config using a repo-root `.insight.toml` if present.
pub fn init_for_root(root: &Path) -> &'static Config {
   let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
   CONFIG.get_or_init(|| Config::load_with_repo(&root))
}

/// Returns the base directory for global insight configuration.
///
/// Kept apart from any repository's metadata directory so that
/// uninitializing a home-directory root never removes it.
pub fn base_dir() -> Option<&'static PathBuf> {
   static ONCE: OnceLock<Option<PathBuf>> = OnceLock::new();
   ONCE
      .get_or_init(|| {
         BaseDirs::new()
            .map(|d| d.config_dir().join(APP_DIR))
            .or_else(|| {
               std::env::var("HOME")
                  .ok()
                  .map(|h| PathBuf::from(h).join(".config").join(APP_DIR))
            })
      })
      .as_ref()
}

pub fn config_file_path() -> Option<PathBuf> {
   base_dir().map(|d| d.join("config.toml"))
}

fn ensure_global_config() -> Option<PathBuf> {
   let config_path = config_file_path()?;
   if !config_path.exists() {
      Config::create_default_config(&config_path);
   }
   Some(config_path)
}

pub fn repo_config_path(root: &Path) -> PathBuf {
   root.join(REPO_CONFIG_FILE)
}

pub fn validate_config(cfg: &Config) -> Result<()> {
   if cfg.max_batch_bytes == 0 || cfg.max_batch_bytes > MAX_BATCH_BYTES_CAP {
      return Err(
         ConfigError::invalid(
            "max_batch_bytes",
            format!("{} must be between 1 and {MAX_BATCH_BYTES_CAP}", cfg.max_batch_bytes),
         )
         .into(),
      );
   }
   if cfg.max_file_size_bytes == 0 || cfg.max_file_size_bytes > MAX_FILE_SIZE_BYTES_CAP {
      return Err(
         ConfigError::invalid(
            "max_file_size_bytes",
            format!("{} must be between 1 and {MAX_FILE_SIZE_BYTES_CAP}", cfg.max_file_size_bytes),
         )
         .into(),
      );
   }
   for (field, value) in [
      ("read_concurrency", cfg.read_concurrency),
      ("upload_concurrency", cfg.upload_concurrency),
   ] {
      if value == 0 || value > MAX_CONCURRENCY_CAP {
         return Err(
            ConfigError::invalid(field, format!("{value} must be between 1 and {MAX_CONCURRENCY_CAP}"))
               .into(),
         );
      }
   }
   if !(cfg.api_base_url.starts_with("http://") || cfg.api_base_url.starts_with("https://")) {
      return Err(
         ConfigError::invalid("api_base_url", format!("{} is not an http(s) url", cfg.api_base_url))
            .into(),
      );
   }
   if let Some(ext) = cfg.allowed_extensions.iter().find(|e| e.trim().is_empty()) {
      return Err(ConfigError::invalid("allowed_extensions", format!("{ext:?} is empty")).into());
   }
   Ok(())
}
