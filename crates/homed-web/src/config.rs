//! Gateway configuration: TOML file + CLI overrides.

use homed_core::{HomedError, HomedResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub mqtt: MqttSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_frontend")]
    pub frontend: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_cookie_max_age")]
    pub cookie_max_age: u64,
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            frontend: default_frontend(),
            port: default_port(),
            username: None,
            password: None,
            cookie_max_age: default_cookie_max_age(),
            database: default_database(),
        }
    }
}

/// `[mqtt]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttSection {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_retained")]
    pub retained: Vec<String>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            prefix: default_prefix(),
            retained: default_retained(),
        }
    }
}

fn default_frontend() -> String {
    "/usr/share/homed-web".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_cookie_max_age() -> u64 {
    604800
}
fn default_database() -> String {
    "~/.homed/web.json".to_string()
}
fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_prefix() -> String {
    "homed".to_string()
}
fn default_retained() -> Vec<String> {
    ["device", "expose", "service", "status"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Resolved gateway configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub frontend: PathBuf,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cookie_max_age: u64,
    pub database: PathBuf,
    pub mqtt: MqttConfig,
}

/// Resolved bus connection settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub prefix: String,
    pub retained: Vec<String>,
}

impl GatewayConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_frontend: Option<&str>,
        cli_database: Option<&str>,
    ) -> HomedResult<Self> {
        // Load base config from file
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| HomedError::Config(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile {
                    server: ServerSection::default(),
                    mqtt: MqttSection::default(),
                }
            }
        } else {
            ConfigFile {
                server: ServerSection::default(),
                mqtt: MqttSection::default(),
            }
        };

        // Merge CLI overrides
        let port = cli_port.unwrap_or(file_config.server.port);
        let frontend = cli_frontend
            .map(|s| s.to_string())
            .unwrap_or(file_config.server.frontend);
        let database = cli_database
            .map(|s| s.to_string())
            .unwrap_or(file_config.server.database);

        Ok(Self {
            frontend: expand_tilde_str(&frontend),
            port,
            username: non_empty(file_config.server.username),
            password: non_empty(file_config.server.password),
            cookie_max_age: file_config.server.cookie_max_age,
            database: expand_tilde_str(&database),
            mqtt: MqttConfig {
                host: file_config.mqtt.host,
                port: file_config.mqtt.port,
                username: non_empty(file_config.mqtt.username),
                password: non_empty(file_config.mqtt.password),
                prefix: file_config.mqtt.prefix,
                retained: file_config.mqtt.retained,
            },
        })
    }
}

/// An empty string in the file counts as unset.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if s.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&s[2..]);
        }
    }
    PathBuf::from(s)
}
