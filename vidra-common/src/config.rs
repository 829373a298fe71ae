//! Configuration loading and connection settings resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Default relay endpoint used when nothing else is configured
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:5850/socket";

/// Connection settings for the real-time channel
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub server_url: String,
    pub application_key: Option<String>,
}

/// Server URL resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. `VIDRA_SERVER_URL` environment variable
/// 3. TOML config file (`server_url` key)
/// 4. Compiled default (fallback)
pub fn resolve_server_url(cli_arg: Option<&str>) -> String {
    if let Some(url) = cli_arg {
        return url.to_string();
    }

    if let Ok(url) = std::env::var("VIDRA_SERVER_URL") {
        return url;
    }

    if let Some(url) = read_config_key("server_url") {
        return url;
    }

    DEFAULT_SERVER_URL.to_string()
}

/// Application key resolution, same priority order as the server URL
///
/// Returns `None` when no key is configured anywhere; the relay accepts
/// anonymous connections for local development.
pub fn resolve_application_key(cli_arg: Option<&str>) -> Option<String> {
    if let Some(key) = cli_arg {
        return Some(key.to_string());
    }

    if let Ok(key) = std::env::var("VIDRA_APPLICATION_KEY") {
        return Some(key);
    }

    read_config_key("application_key")
}

fn read_config_key(key: &str) -> Option<String> {
    let path = config_file_path().ok()?;
    let content = std::fs::read_to_string(path).ok()?;
    let table = toml::from_str::<toml::Value>(&content).ok()?;
    table.get(key).and_then(|v| v.as_str()).map(String::from)
}

/// Locate the platform configuration file
pub fn config_file_path() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/vidra/config.toml first, then /etc/vidra/config.toml
        let user_config = dirs::config_dir().map(|d| d.join("vidra").join("config.toml"));
        let system_config = PathBuf::from("/etc/vidra/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        Err(Error::Config("No config file found".to_string()))
    } else {
        let path = dirs::config_dir()
            .map(|d| d.join("vidra").join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

        if path.exists() {
            Ok(path)
        } else {
            Err(Error::Config(format!("Config file not found: {:?}", path)))
        }
    }
}

/// Default directory for locally persisted engine state
/// (offline analytics queue, session identifier)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("vidra"))
        .unwrap_or_else(|| PathBuf::from("./vidra_data"))
}
