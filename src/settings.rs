use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const CONFIG_FILE_VAR: &str = "PROXY_CONFIG_FILE";
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser, Debug, Default)]
#[command(name = "ai-proxy", version, about = "Transparent reverse proxy for a single upstream")]
pub struct Cli {
  /// YAML settings file (defaults to ./config.yaml when present)
  #[arg(short, long)]
  pub config: Option<PathBuf>,
  #[arg(long)]
  pub host: Option<String>,
  #[arg(short, long)]
  pub port: Option<u16>,
  /// Upstream every request is relayed to
  #[arg(long)]
  pub target_url: Option<String>,
  #[arg(long)]
  pub log_level: Option<String>,
}

#[derive(Error, Debug)]
pub enum SettingsError {
  #[error("unable to read {}: {}", .path.display(), .source)]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("invalid settings file {}: {}", .path.display(), .source)]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
  #[error("invalid value {value:?} for {name}")]
  InvalidValue { name: &'static str, value: String },
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct Settings {
  pub target_url: String,
  pub host: String,
  pub port: u16,
  /// Seconds.
  pub request_timeout: u64,
  pub log_level: String,
  pub max_workers: usize,
  pub enable_cors: bool,
  pub cors_origins: Vec<String>,
  pub cors_methods: Vec<String>,
  pub cors_headers: Vec<String>,
  pub proxy_buffer_size: usize,
  // Loaded and validated only, forwarding never retries.
  pub max_retries: u32,
  pub retry_backoff_factor: f64,
  pub ssl_verify: bool,
}

impl Default for Settings {
  fn default() -> Self {
    Settings {
      target_url: "https://ai.megallm.io".into(),
      host: "0.0.0.0".into(),
      port: 8080,
      request_timeout: 300,
      log_level: "INFO".into(),
      max_workers: 4,
      enable_cors: true,
      cors_origins: vec!["*".into()],
      cors_methods: vec!["*".into()],
      cors_headers: vec!["*".into()],
      proxy_buffer_size: 8192,
      max_retries: 3,
      retry_backoff_factor: 0.5,
      ssl_verify: true,
    }
  }
}

impl Settings {
  /// Defaults, then the settings file, then environment, then flags.
  pub fn load(cli: &Cli) -> Result<Settings, SettingsError> {
    let config_file = cli
      .config
      .clone()
      .or_else(|| env::var_os(CONFIG_FILE_VAR).map(PathBuf::from))
      .or_else(|| {
        let default_file = Path::new(DEFAULT_CONFIG_FILE);
        default_file.exists().then(|| default_file.to_path_buf())
      });

    let mut settings = match config_file {
      Some(path) => Settings::load_from_file(&path)?,
      None => Settings::default(),
    };

    settings.apply_env(|name| env::var(name).ok())?;
    settings.apply_cli(cli);
    settings.validate()?;

    Ok(settings)
  }

  pub fn load_from_file(path: &Path) -> Result<Settings, SettingsError> {
    let file = File::open(path).map_err(|source| SettingsError::Io {
      path: path.to_path_buf(),
      source,
    })?;

    serde_yaml::from_reader(file).map_err(|source| SettingsError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Overrides fields from variables named after them in upper case.
  pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SettingsError>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(value) = lookup("TARGET_URL") {
      self.target_url = value;
    }
    if let Some(value) = lookup("HOST") {
      self.host = value;
    }
    if let Some(value) = lookup("LOG_LEVEL") {
      self.log_level = value;
    }

    set_parsed(&lookup, "PORT", &mut self.port)?;
    set_parsed(&lookup, "REQUEST_TIMEOUT", &mut self.request_timeout)?;
    set_parsed(&lookup, "MAX_WORKERS", &mut self.max_workers)?;
    set_parsed(&lookup, "PROXY_BUFFER_SIZE", &mut self.proxy_buffer_size)?;
    set_parsed(&lookup, "MAX_RETRIES", &mut self.max_retries)?;
    set_parsed(&lookup, "RETRY_BACKOFF_FACTOR", &mut self.retry_backoff_factor)?;

    set_flag(&lookup, "ENABLE_CORS", &mut self.enable_cors)?;
    set_flag(&lookup, "SSL_VERIFY", &mut self.ssl_verify)?;

    set_list(&lookup, "CORS_ORIGINS", &mut self.cors_origins)?;
    set_list(&lookup, "CORS_METHODS", &mut self.cors_methods)?;
    set_list(&lookup, "CORS_HEADERS", &mut self.cors_headers)?;

    Ok(())
  }

  pub fn apply_cli(&mut self, cli: &Cli) {
    if let Some(host) = &cli.host {
      self.host = host.clone();
    }
    if let Some(port) = cli.port {
      self.port = port;
    }
    if let Some(target_url) = &cli.target_url {
      self.target_url = target_url.clone();
    }
    if let Some(log_level) = &cli.log_level {
      self.log_level = log_level.clone();
    }
  }

  pub fn validate(&self) -> Result<(), SettingsError> {
    let target_ok = Url::parse(&self.target_url)
      .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
      .unwrap_or(false);
    if !target_ok {
      return Err(invalid("target_url", &self.target_url));
    }

    if self.request_timeout == 0 {
      return Err(invalid("request_timeout", self.request_timeout));
    }
    if self.proxy_buffer_size == 0 {
      return Err(invalid("proxy_buffer_size", self.proxy_buffer_size));
    }
    if self.max_workers == 0 {
      return Err(invalid("max_workers", self.max_workers));
    }
    if self.retry_backoff_factor.is_nan() || self.retry_backoff_factor < 0.0 {
      return Err(invalid("retry_backoff_factor", self.retry_backoff_factor));
    }

    self.log_level_filter()?;
    Ok(())
  }

  pub fn log_level_filter(&self) -> Result<LevelFilter, SettingsError> {
    match self.log_level.to_ascii_lowercase().as_str() {
      "critical" => Ok(LevelFilter::Error),
      "warning" => Ok(LevelFilter::Warn),
      level => LevelFilter::from_str(level).map_err(|_| invalid("log_level", &self.log_level)),
    }
  }
}

fn invalid(name: &'static str, value: impl ToString) -> SettingsError {
  SettingsError::InvalidValue {
    name,
    value: value.to_string(),
  }
}

fn set_parsed<F, T>(lookup: &F, name: &'static str, target: &mut T) -> Result<(), SettingsError>
where
  F: Fn(&str) -> Option<String>,
  T: FromStr,
{
  if let Some(raw) = lookup(name) {
    *target = raw.trim().parse().map_err(|_| invalid(name, &raw))?;
  }
  Ok(())
}

fn set_flag<F>(lookup: &F, name: &'static str, target: &mut bool) -> Result<(), SettingsError>
where
  F: Fn(&str) -> Option<String>,
{
  if let Some(raw) = lookup(name) {
    *target = match raw.trim().to_ascii_lowercase().as_str() {
      "1" | "true" | "yes" | "on" => true,
      "0" | "false" | "no" | "off" => false,
      _ => return Err(invalid(name, &raw)),
    };
  }
  Ok(())
}

/// Accepts a JSON array or a comma separated list.
fn set_list<F>(lookup: &F, name: &'static str, target: &mut Vec<String>) -> Result<(), SettingsError>
where
  F: Fn(&str) -> Option<String>,
{
  if let Some(raw) = lookup(name) {
    let trimmed = raw.trim();
    *target = if trimmed.starts_with('[') {
      serde_json::from_str(trimmed).map_err(|_| invalid(name, &raw))?
    } else {
      trimmed
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
    };
  }
  Ok(())
}
