use std::env;
use std::path::PathBuf;

pub const CONFIG_ENV_VAR: &str = "PODGATE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "podgate.ini";

pub fn config_path(cli: Option<PathBuf>) -> PathBuf {
  resolve_config_path(cli, env::var(CONFIG_ENV_VAR).ok())
}

fn resolve_config_path(cli: Option<PathBuf>, from_env: Option<String>) -> PathBuf {
  if let Some(path) = cli {
    return path;
  }
  match from_env {
    Some(p) if !p.trim().is_empty() => PathBuf::from(p),
    _ => PathBuf::from(DEFAULT_CONFIG_FILE),
  }
}
