//! Bridge configuration loading.
//!
//! A TOML file is optional; without one every field takes its default.
//! CLI flags are applied on top by the binary.
//!
//! # Required fields (when a file is given)
//! - `schema_version = 1`

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_BIND: &str = "0.0.0.0:4567";
pub const DEFAULT_WS_PATH: &str = "/ws";
pub const DEFAULT_LOG_LEVEL: &str = "info";

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub schema_version: u32,
    pub server: ServerConfig,
    pub device_link: DeviceLinkConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub ws_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLinkConfig {
    pub backend: DeviceLinkBackend,
}

/// Device-link implementations the binary knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLinkBackend {
    /// In-process hub; clients of one bridge can reach each other.
    Loopback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive.
    pub level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            server: ServerConfig {
                bind: SocketAddr::from(([0, 0, 0, 0], 4567)),
                ws_path: DEFAULT_WS_PATH.to_owned(),
            },
            device_link: DeviceLinkConfig {
                backend: DeviceLinkBackend::Loopback,
            },
            logging: LoggingConfig {
                level: DEFAULT_LOG_LEVEL.to_owned(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    server: Option<RawServerConfig>,
    device_link: Option<RawDeviceLinkConfig>,
    logging: Option<RawLoggingConfig>,
}

#[derive(Debug, Deserialize)]
struct RawServerConfig {
    bind: Option<String>,
    ws_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDeviceLinkConfig {
    backend: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLoggingConfig {
    level: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

pub fn load_config_from_path(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<BridgeConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let defaults = BridgeConfig::default();

    let server = match raw.server {
        None => defaults.server,
        Some(s) => ServerConfig {
            bind: match s.bind {
                Some(bind) => parse_bind(&bind)?,
                None => defaults.server.bind,
            },
            ws_path: match s.ws_path {
                Some(path) => validate_ws_path(path)?,
                None => defaults.server.ws_path,
            },
        },
    };

    let device_link = match raw.device_link.and_then(|d| d.backend) {
        None => defaults.device_link,
        Some(backend) => DeviceLinkConfig {
            backend: parse_backend(&backend)?,
        },
    };

    let logging = match raw.logging.and_then(|l| l.level) {
        None => defaults.logging,
        Some(level) if level.trim().is_empty() => {
            return Err(ConfigError::InvalidValue(
                "logging.level must not be empty".to_owned(),
            ));
        }
        Some(level) => LoggingConfig { level },
    };

    Ok(BridgeConfig {
        schema_version,
        server,
        device_link,
        logging,
    })
}

/// Parse a `host:port` listen address.
pub fn parse_bind(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("server.bind '{value}' is not a socket address")))
}

fn validate_ws_path(path: String) -> Result<String, ConfigError> {
    if path.starts_with('/') {
        Ok(path)
    } else {
        Err(ConfigError::InvalidValue(format!(
            "server.ws_path must start with '/', got '{path}'"
        )))
    }
}

fn parse_backend(value: &str) -> Result<DeviceLinkBackend, ConfigError> {
    match value {
        "loopback" => Ok(DeviceLinkBackend::Loopback),
        other => Err(ConfigError::InvalidValue(format!(
            "device_link.backend '{other}' is not supported"
        ))),
    }
}
