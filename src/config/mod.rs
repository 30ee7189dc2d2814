use crate::error::ConfigError;
use configparser::ini::Ini;
use podgate_core::state::{DEFAULT_DATA_SUFFIX, DEFAULT_LOG_SUFFIX};
use podgate_core::GatewayConfig;
use std::path::{Path, PathBuf};

pub mod paths;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 4444;
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesConfig {
  pub data_dir: PathBuf,
  pub key_file: Option<String>,
  pub token_file: Option<String>,
  pub state_base: Option<String>,
  pub data_suffix: String,
  pub log_suffix: String,
  pub response_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
  pub level: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
  pub server: ServerConfig,
  pub files: FilesConfig,
  pub logging: LoggingConfig,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      server: ServerConfig {
        host: DEFAULT_HOST.to_string(),
        port: DEFAULT_PORT,
      },
      files: FilesConfig {
        data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        key_file: None,
        token_file: None,
        state_base: None,
        data_suffix: DEFAULT_DATA_SUFFIX.to_string(),
        log_suffix: DEFAULT_LOG_SUFFIX.to_string(),
        response_file: None,
      },
      logging: LoggingConfig {
        level: DEFAULT_LOG_LEVEL.to_string(),
      },
    }
  }
}

impl AppConfig {
  pub fn bind_address(&self) -> String {
    format!("{}:{}", self.server.host, self.server.port)
  }
}

impl FilesConfig {
  pub fn gateway_config(&self) -> GatewayConfig {
    let mut cfg = GatewayConfig::new(&self.data_dir);
    if let Some(key) = &self.key_file {
      cfg.key_file = resolve_with_base(&self.data_dir, key);
    }
    if let Some(tokens) = &self.token_file {
      cfg.token_file = resolve_with_base(&self.data_dir, tokens);
    }
    if let Some(base) = &self.state_base {
      cfg.state_base = resolve_with_base(&self.data_dir, base);
    }
    if let Some(response) = &self.response_file {
      cfg.response_file = resolve_with_base(&self.data_dir, response);
    }
    cfg.data_suffix = self.data_suffix.clone();
    cfg.log_suffix = self.log_suffix.clone();
    cfg
  }
}

fn resolve_with_base(base: &Path, target: &str) -> PathBuf {
  let raw = PathBuf::from(target);
  if raw.is_absolute() {
    raw
  } else {
    base.join(target)
  }
}

fn parse_u16(val: &str) -> Option<u16> {
  val.trim().parse::<u16>().ok().filter(|port| *port != 0)
}

fn read_string(parser: &Ini, section: &str, key: &str, default: &str) -> String {
  parser
    .get(section, key)
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
    .unwrap_or_else(|| default.to_string())
}

fn read_optional(parser: &Ini, section: &str, key: &str) -> Option<String> {
  parser
    .get(section, key)
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

fn read_port(parser: &Ini, section: &str, key: &str, default: u16) -> Result<u16, ConfigError> {
  match read_optional(parser, section, key) {
    None => Ok(default),
    Some(raw) => parse_u16(&raw).ok_or(ConfigError::Invalid {
      section: section.to_string(),
      key: key.to_string(),
      value: raw,
    }),
  }
}

pub fn load_app_config(path: &Path) -> Result<AppConfig, ConfigError> {
  let mut parser = Ini::new();
  if path.exists() {
    parser
      .load(path.to_string_lossy().as_ref())
      .map_err(ConfigError::Parse)?;
  }

  let mut cfg = AppConfig::default();

  cfg.server.host = read_string(&parser, "server", "host", &cfg.server.host);
  cfg.server.port = read_port(&parser, "server", "port", cfg.server.port)?;

  if let Some(dir) = read_optional(&parser, "files", "data_dir") {
    cfg.files.data_dir = PathBuf::from(dir);
  }
  cfg.files.key_file = read_optional(&parser, "files", "key_file");
  cfg.files.token_file = read_optional(&parser, "files", "token_file");
  cfg.files.state_base = read_optional(&parser, "files", "state_base");
  cfg.files.data_suffix = read_string(&parser, "files", "data_suffix", &cfg.files.data_suffix);
  cfg.files.log_suffix = read_string(&parser, "files", "log_suffix", &cfg.files.log_suffix);
  cfg.files.response_file = read_optional(&parser, "files", "response_file");

  cfg.logging.level = read_string(&parser, "logging", "level", &cfg.logging.level);

  Ok(cfg)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  #[test]
  fn missing_file_gives_defaults() {
    let tmp = TempDir::new().unwrap();
    let cfg = load_app_config(&tmp.path().join("absent.ini")).unwrap();
    assert_eq!(cfg, AppConfig::default());
    assert_eq!(cfg.bind_address(), "0.0.0.0:4444");
    let gateway = cfg.files.gateway_config();
    assert_eq!(gateway.key_file, PathBuf::from("data/key"));
    assert_eq!(gateway.token_file, PathBuf::from("data/tokens"));
  }

  #[test]
  fn sections_override_defaults() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("podgate.ini");
    fs::write(
      &path,
      "[server]\nport = 8080\n\n[files]\ndata_dir = /var/lib/podgate\nkey_file = /etc/podgate/key\nstate_base = pods/current\nlog_suffix = .jsonl\n\n[logging]\nlevel = debug\n",
    )
    .unwrap();

    let cfg = load_app_config(&path).unwrap();

    assert_eq!(cfg.server.host, DEFAULT_HOST);
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.logging.level, "debug");
    let gateway = cfg.files.gateway_config();
    assert_eq!(gateway.key_file, PathBuf::from("/etc/podgate/key"));
    assert_eq!(gateway.state_base, PathBuf::from("/var/lib/podgate/pods/current"));
    assert_eq!(gateway.response_file, PathBuf::from("/var/lib/podgate/response"));
    assert_eq!(gateway.data_suffix, ".json");
    assert_eq!(gateway.log_suffix, ".jsonl");
  }

  #[test]
  fn bad_port_is_reported() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("podgate.ini");
    fs::write(&path, "[server]\nport = 70000\n").unwrap();

    let err = load_app_config(&path).unwrap_err();

    assert_eq!(err.to_string(), "invalid value '70000' for server.port");
  }
}
