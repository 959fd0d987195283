//! Startup configuration – `~/.brewlink/config.toml`.
//!
//! Every key is optional; a missing file or section means defaults. After
//! loading, `BREWLINK_*` environment variables override individual keys and
//! [`Config::validate`] refuses settings the bridge cannot run with.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use brewlink_middleware::MqttSettings;
use brewlink_runtime::CommandInterpreter;
use brewlink_state::MaintenanceThresholds;
use brewlink_types::{BrewError, CommandIntent};
use serde::{Deserialize, Serialize};

/// Variable naming an explicit config file.
pub const CONFIG_PATH_VAR: &str = "BREWLINK_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub maintenance: MaintenanceThresholds,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: IpAddr,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: brewlink_cockpit::DEFAULT_PORT,
        }
    }
}

/// Broker connection. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub command_topic: String,
    pub status_topic: String,
    /// How long startup waits for the first broker session before carrying
    /// on and leaving the reconnect loop to it.
    pub connect_timeout_secs: u64,
    pub publish_timeout_secs: u64,
    pub reconnect_min_secs: u64,
    pub reconnect_max_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        let settings = MqttSettings::default();
        Self {
            host: settings.host,
            port: settings.port,
            client_id: settings.client_id,
            keep_alive_secs: settings.keep_alive.as_secs(),
            command_topic: settings.command_topic,
            status_topic: settings.status_topic,
            connect_timeout_secs: 5,
            publish_timeout_secs: settings.publish_timeout.as_secs(),
            reconnect_min_secs: settings.reconnect_min.as_secs(),
            reconnect_max_secs: settings.reconnect_max.as_secs(),
        }
    }
}

impl MqttConfig {
    pub fn settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            command_topic: self.command_topic.clone(),
            status_topic: self.status_topic.clone(),
            publish_timeout: Duration::from_secs(self.publish_timeout_secs),
            reconnect_min: Duration::from_secs(self.reconnect_min_secs),
            reconnect_max: Duration::from_secs(self.reconnect_max_secs),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Conversational service. The API key is stored as plain text, so the
/// file is written owner-only.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    pub user: String,
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.dify.ai/v1".to_string(),
            api_key: String::new(),
            user: "user".to_string(),
            timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConfig")
            .field("base_url", &self.base_url)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("user", &self.user)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ChatConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Vocabulary for the command interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub noun: String,
    pub on_phrases: Vec<String>,
    pub off_phrases: Vec<String>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            noun: "cafeteira".to_string(),
            on_phrases: vec![CommandIntent::ON_COMMAND.to_string()],
            off_phrases: vec![CommandIntent::OFF_COMMAND.to_string()],
        }
    }
}

impl CommandsConfig {
    pub fn interpreter(&self) -> CommandInterpreter {
        CommandInterpreter::power_switch(
            self.noun.clone(),
            self.on_phrases.iter().cloned(),
            self.off_phrases.iter().cloned(),
        )
    }
}

impl Config {
    /// # Errors
    ///
    /// [`BrewError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<(), BrewError> {
        let invalid = |msg: &str| Err(BrewError::Config(msg.to_string()));
        let mqtt = &self.mqtt;

        if mqtt.host.trim().is_empty() {
            return invalid("mqtt.host must not be empty");
        }
        if mqtt.command_topic.trim().is_empty() || mqtt.status_topic.trim().is_empty() {
            return invalid("mqtt topics must not be empty");
        }
        if mqtt.command_topic == mqtt.status_topic {
            return invalid("mqtt.command_topic and mqtt.status_topic must differ");
        }
        if mqtt.keep_alive_secs < 5 {
            return invalid("mqtt.keep_alive_secs must be at least 5");
        }
        if mqtt.publish_timeout_secs == 0 {
            return invalid("mqtt.publish_timeout_secs must be greater than 0");
        }
        if mqtt.reconnect_min_secs == 0 || mqtt.reconnect_min_secs > mqtt.reconnect_max_secs {
            return invalid("mqtt.reconnect_min_secs must be in 1..=reconnect_max_secs");
        }
        if self.chat.timeout_secs == 0 {
            return invalid("chat.timeout_secs must be greater than 0");
        }

        let commands = &self.commands;
        if commands.noun.trim().is_empty() {
            return invalid("commands.noun must not be empty");
        }
        let blank = |phrases: &[String]| phrases.iter().all(|p| p.trim().is_empty());
        if blank(commands.on_phrases.as_slice()) || blank(commands.off_phrases.as_slice()) {
            return invalid("commands.on_phrases and commands.off_phrases need at least one phrase");
        }
        Ok(())
    }
}

/// Config file location: `explicit` if given, else `$BREWLINK_CONFIG`, else
/// `~/.brewlink/config.toml`.
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    resolve_path(explicit, std::env::var(CONFIG_PATH_VAR).ok(), &home)
}

pub(crate) fn resolve_path(explicit: Option<PathBuf>, from_env: Option<String>, home: &str) -> PathBuf {
    explicit
        .or_else(|| from_env.filter(|p| !p.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| config_path_for_home(home))
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".brewlink").join("config.toml")
}

/// `Ok(None)` when the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, BrewError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BrewError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| BrewError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `BREWLINK_*` environment overrides.
///
/// | Variable | Key |
/// |---|---|
/// | `BREWLINK_MQTT_HOST` | `mqtt.host` |
/// | `BREWLINK_MQTT_PORT` | `mqtt.port` |
/// | `BREWLINK_HTTP_PORT` | `http.port` |
/// | `BREWLINK_CHAT_URL` | `chat.base_url` |
/// | `BREWLINK_CHAT_API_KEY` | `chat.api_key` |
///
/// Port values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("BREWLINK_MQTT_HOST") {
        cfg.mqtt.host = v;
    }
    if let Ok(v) = std::env::var("BREWLINK_MQTT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.mqtt.port = port;
    }
    if let Ok(v) = std::env::var("BREWLINK_HTTP_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.http.port = port;
    }
    if let Ok(v) = std::env::var("BREWLINK_CHAT_URL") {
        cfg.chat.base_url = v;
    }
    if let Ok(v) = std::env::var("BREWLINK_CHAT_API_KEY") {
        cfg.chat.api_key = v;
    }
}

/// Write `cfg` to `path`, creating the directory. Owner-only on Unix.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), BrewError> {
    let fail = |what: &str, e: std::io::Error| BrewError::Config(format!("{what}: {e}"));

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| fail("failed to create config directory", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| fail("failed to set config directory permissions", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| BrewError::Config(format!("failed to serialize config: {e}")))?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| fail(&format!("failed to write {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| fail(&format!("failed to write {}", path.display()), e))?;
    Ok(())
}
