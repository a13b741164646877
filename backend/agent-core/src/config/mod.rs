use crate::error::config::ConfigError;

use common::ErrorLocation;

use std::net::Ipv4Addr;
use std::panic::Location;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "hostlink.json";
const CONFIG_VERSION: u32 = 1;

/// Environment variable that overrides `transport.port`.
pub const PORT_ENV_VAR: &str = "HOSTLINK_PORT";

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5050;

// ============================================
// CONFIG STRUCTS
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_outgoing_poll_interval_ms")]
    pub outgoing_poll_interval_ms: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Per-write timeout on the peer socket; a send blocked longer than this fails.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u32,
    #[serde(default = "default_max_consecutive_send_failures")]
    pub max_consecutive_send_failures: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            outgoing_poll_interval_ms: default_outgoing_poll_interval_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            max_consecutive_send_failures: default_max_consecutive_send_failures(),
        }
    }
}

impl TransportConfig {
    /// Parses `bind_address` as an IPv4 address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if it is not a dotted-quad address.
    pub fn bind_ipv4(&self) -> Result<Ipv4Addr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|e| ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!("Invalid bind_address '{}': {e}", self.bind_address),
            })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Emit OperationSucceeded/OperationFailed for commands that otherwise
    /// produce no event.
    #[serde(default)]
    pub acknowledge_operations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub host: HostConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            transport: TransportConfig::default(),
            dispatch: DispatchConfig::default(),
            host: HostConfig::default(),
        }
    }
}

// ============================================
// DEFAULT FUNCTIONS
// ============================================

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}
fn default_outgoing_poll_interval_ms() -> u64 {
    10
}
fn default_stop_timeout_ms() -> u64 {
    5000
}
fn default_write_timeout_ms() -> u64 {
    5000
}
fn default_max_frame_bytes() -> u32 {
    16 * 1024 * 1024
}
fn default_max_consecutive_send_failures() -> u32 {
    3
}
fn default_tick_interval_ms() -> u64 {
    16
}

// ============================================
// IMPLEMENTATION
// ============================================

impl AgentConfig {
    /// Load config from {config_dir}/hostlink.json.
    ///
    /// # Returns
    ///
    /// Returns defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read, parsed or
    /// validated.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = Self::path_in(config_dir);

        if !config_path.exists() {
            info!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            warn!("Failed to read config file: {}", e);
            ConfigError::ReadError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                source: e,
            }
        })?;

        let config: AgentConfig = serde_json::from_str(&contents).map_err(|e| {
            warn!("Failed to parse config JSON: {}", e);
            ConfigError::ParseError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        config.validate()?;

        info!("Config loaded from {}", config_path.display());
        Ok(config)
    }

    /// Save config to {config_dir}/hostlink.json via temp file + rename.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation, directory creation, serialization,
    /// the write or the rename fails.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        std::fs::create_dir_all(config_dir).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: config_dir.to_path_buf(),
            source: e,
        })?;

        let config_path = Self::path_in(config_dir);
        let temp_path = config_dir.join(format!("{}.tmp", CONFIG_FILE_NAME));

        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializeError {
            location: ErrorLocation::from(Location::caller()),
            reason: e.to_string(),
        })?;

        std::fs::write(&temp_path, json).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: temp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&temp_path, &config_path).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: config_path.clone(),
            source: e,
        })?;

        info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Validate config values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version == 0 || self.version > CONFIG_VERSION {
            return Err(validation_error(format!(
                "Invalid version: {} (expected 1-{})",
                self.version, CONFIG_VERSION
            )));
        }

        self.transport.bind_ipv4()?;

        if self.transport.outgoing_poll_interval_ms == 0 {
            return Err(validation_error(String::from(
                "transport.outgoing_poll_interval_ms must be greater than 0",
            )));
        }

        if self.transport.stop_timeout_ms == 0 {
            return Err(validation_error(String::from(
                "transport.stop_timeout_ms must be greater than 0",
            )));
        }

        if self.transport.write_timeout_ms == 0 {
            return Err(validation_error(String::from(
                "transport.write_timeout_ms must be greater than 0",
            )));
        }

        if self.transport.max_frame_bytes == 0 {
            return Err(validation_error(String::from(
                "transport.max_frame_bytes must be greater than 0",
            )));
        }

        if self.transport.max_consecutive_send_failures == 0 {
            return Err(validation_error(String::from(
                "transport.max_consecutive_send_failures must be at least 1",
            )));
        }

        if self.host.tick_interval_ms == 0 {
            return Err(validation_error(String::from(
                "host.tick_interval_ms must be greater than 0",
            )));
        }

        Ok(())
    }

    /// Applies environment overrides from the process environment.
    ///
    /// # Errors
    ///
    /// See [`AgentConfig::apply_overrides`].
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup` (currently only [`PORT_ENV_VAR`]).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override cannot be parsed.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup(PORT_ENV_VAR) {
            let port = raw.trim().parse::<u16>().map_err(|e| {
                validation_error(format!("Invalid {PORT_ENV_VAR} value '{raw}': {e}"))
            })?;
            info!("Using {PORT_ENV_VAR} override: {port}");
            self.transport.port = port;
        }
        Ok(())
    }

    pub fn path_in(config_dir: &Path) -> PathBuf {
        config_dir.join(CONFIG_FILE_NAME)
    }
}

/// Loads a `.env` file from the working directory into the process environment.
///
/// Returns the path that was loaded, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    match dotenvy::dotenv() {
        Ok(path) => {
            info!("Loaded .env from: {:?}", path);
            Some(path)
        }
        Err(e) if e.not_found() => None,
        Err(e) => {
            warn!("Failed to parse .env: {}", e);
            None
        }
    }
}

#[track_caller]
fn validation_error(reason: String) -> ConfigError {
    ConfigError::ValidationError {
        location: ErrorLocation::from(Location::caller()),
        reason,
    }
}
