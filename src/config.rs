use crate::auth::AuthSettings;
use crate::core::page::PageKind;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::{
  fs,
  path::{Path, PathBuf},
  time::Duration,
};

const FILE_NAME: &str = "config.yml";
const STORAGE_FILE_NAME: &str = "storage.yml";
const PANIC_LOG_FILE_NAME: &str = "panic.log";
const CONFIG_DIR: &str = ".config";
const APP_CONFIG_DIR: &str = "ytm-album-art";

/// Application identifier registered with the Spotify developer dashboard.
pub const CLIENT_ID: &str = "a0aeb4810add4986905a6a9327ff994c";
pub const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
pub const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const PROFILE_URL: &str = "https://api.spotify.com/v1/me";
pub const SEARCH_URL: &str = "https://api.spotify.com/v1/search";
pub const SCOPES: &str = "user-read-private user-read-email";
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";

/// Every delay the page controller works with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timings {
  pub debounce: Duration,
  pub attach_retry: Duration,
  pub navigation_poll: Duration,
  pub navigation_settle: Duration,
  /// From a successful startup validation to the first monitoring start.
  pub start_delay: Duration,
  /// From attaching the observer to the first forced evaluation.
  pub initial_check: Duration,
  /// Re-evaluation delay when monitoring is started while already running.
  pub restart_check: Duration,
  /// From an access token appearing in storage to monitoring start.
  pub token_added_delay: Duration,
}

impl Timings {
  pub fn for_page(kind: PageKind) -> Self {
    let video_page = kind == PageKind::VideoPage;
    Self {
      debounce: Duration::from_millis(100),
      attach_retry: Duration::from_millis(500),
      navigation_poll: Duration::from_millis(1000),
      navigation_settle: Duration::from_millis(300),
      start_delay: Duration::from_millis(if video_page { 400 } else { 200 }),
      initial_check: Duration::from_millis(if video_page { 300 } else { 200 }),
      restart_check: Duration::from_millis(100),
      token_added_delay: Duration::from_millis(1000),
    }
  }
}

#[derive(Default, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfigString {
  pub client_id: Option<String>,
  pub redirect_uri: Option<String>,
  pub debounce_ms: Option<u64>,
  pub attach_retry_ms: Option<u64>,
  pub navigation_poll_ms: Option<u64>,
  pub navigation_settle_ms: Option<u64>,
  pub start_delay_ms: Option<u64>,
  pub validation_timeout_ms: Option<u64>,
  pub rpc_timeout_ms: Option<u64>,
  pub log_level: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AppPaths {
  pub config_file_path: PathBuf,
  pub storage_file_path: PathBuf,
  pub panic_log_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
  pub client_id: String,
  pub redirect_uri: String,
  pub debounce_ms: u64,
  pub attach_retry_ms: u64,
  pub navigation_poll_ms: u64,
  pub navigation_settle_ms: u64,
  /// `None` keeps the per-page default.
  pub start_delay_ms: Option<u64>,
  pub validation_timeout_ms: u64,
  pub rpc_timeout_ms: u64,
  pub log_level: log::LevelFilter,
  pub paths: Option<AppPaths>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self::new()
  }
}

impl AppConfig {
  pub fn new() -> AppConfig {
    AppConfig {
      client_id: CLIENT_ID.to_string(),
      redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
      debounce_ms: 100,
      attach_retry_ms: 500,
      navigation_poll_ms: 1000,
      navigation_settle_ms: 300,
      start_delay_ms: None,
      validation_timeout_ms: 5000,
      rpc_timeout_ms: 10_000,
      log_level: log::LevelFilter::Info,
      paths: None,
    }
  }

  pub fn get_or_build_paths(&mut self) -> Result<&AppPaths> {
    if self.paths.is_none() {
      let home = dirs::home_dir().ok_or_else(|| anyhow!("No $HOME directory found for config"))?;
      let app_config_dir = Path::new(&home).join(CONFIG_DIR).join(APP_CONFIG_DIR);
      if !app_config_dir.exists() {
        fs::create_dir_all(&app_config_dir)?;
      }

      self.paths = Some(AppPaths {
        config_file_path: app_config_dir.join(FILE_NAME),
        storage_file_path: app_config_dir.join(STORAGE_FILE_NAME),
        panic_log_path: app_config_dir.join(PANIC_LOG_FILE_NAME),
      });
    }
    self
      .paths
      .as_ref()
      .ok_or_else(|| anyhow!("config paths unavailable"))
  }

  pub fn load_config(&mut self) -> Result<()> {
    let config_file_path = self.get_or_build_paths()?.config_file_path.clone();
    if !config_file_path.exists() {
      return Ok(());
    }

    let config_string = fs::read_to_string(&config_file_path)?;
    // serde fails if file is empty
    if config_string.trim().is_empty() {
      return Ok(());
    }

    let config_yml: AppConfigString = serde_yaml::from_str(&config_string)?;
    self.apply(config_yml)
  }

  pub fn apply(&mut self, overrides: AppConfigString) -> Result<()> {
    if let Some(client_id) = overrides.client_id {
      self.client_id = client_id;
    }
    if let Some(redirect_uri) = overrides.redirect_uri {
      reqwest::Url::parse(&redirect_uri)
        .map_err(|e| anyhow!("Invalid redirect_uri {}: {}", redirect_uri, e))?;
      self.redirect_uri = redirect_uri;
    }
    if let Some(ms) = overrides.debounce_ms {
      self.debounce_ms = ms;
    }
    if let Some(ms) = overrides.attach_retry_ms {
      if ms == 0 {
        return Err(anyhow!("attach_retry_ms must be greater than 0"));
      }
      self.attach_retry_ms = ms;
    }
    if let Some(ms) = overrides.navigation_poll_ms {
      if ms == 0 {
        return Err(anyhow!("navigation_poll_ms must be greater than 0"));
      }
      self.navigation_poll_ms = ms;
    }
    if let Some(ms) = overrides.navigation_settle_ms {
      self.navigation_settle_ms = ms;
    }
    if let Some(ms) = overrides.start_delay_ms {
      self.start_delay_ms = Some(ms);
    }
    if let Some(ms) = overrides.validation_timeout_ms {
      self.validation_timeout_ms = ms;
    }
    if let Some(ms) = overrides.rpc_timeout_ms {
      self.rpc_timeout_ms = ms;
    }
    if let Some(level) = overrides.log_level {
      self.log_level = level
        .parse()
        .map_err(|_| anyhow!("Unknown log_level '{}'", level))?;
    }
    Ok(())
  }

  pub fn timings(&self, kind: PageKind) -> Timings {
    let mut timings = Timings::for_page(kind);
    timings.debounce = Duration::from_millis(self.debounce_ms);
    timings.attach_retry = Duration::from_millis(self.attach_retry_ms);
    timings.navigation_poll = Duration::from_millis(self.navigation_poll_ms);
    timings.navigation_settle = Duration::from_millis(self.navigation_settle_ms);
    if let Some(ms) = self.start_delay_ms {
      timings.start_delay = Duration::from_millis(ms);
    }
    timings
  }

  pub fn auth_settings(&self) -> AuthSettings {
    AuthSettings {
      client_id: Some(self.client_id.clone()),
      redirect_uri: self.redirect_uri.clone(),
      authorize_url: AUTHORIZE_URL.to_string(),
      scopes: SCOPES.to_string(),
      validation_timeout: Duration::from_millis(self.validation_timeout_ms),
    }
  }

  pub fn rpc_timeout(&self) -> Duration {
    Duration::from_millis(self.rpc_timeout_ms)
  }
}
