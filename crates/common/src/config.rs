use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

// Default constants
pub const DEFAULT_MAX_POOL_SIZE: usize = 16;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_CACHE_MINUTES: u64 = 5;
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 10000;

pub const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_LOG_FILTER: &str = "info";

pub const ENV_PREFIX: &str = "CONDUIT";

fn serialize_secret<S>(_secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("[REDACTED]")
}

fn serialize_optional_secret<S>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match secret {
        Some(_) => serializer.serialize_str("[REDACTED]"),
        None => serializer.serialize_none(),
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(SecretString::from(s))
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    Ok(s.filter(|s| !s.is_empty()).map(SecretString::from))
}

/// Top-level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct GatewayConfig {
    #[validate(nested)]
    pub target: TargetConfig,

    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheConfig,

    #[serde(default)]
    #[validate(custom(function = "validate_bridge"))]
    pub bridge: Option<BridgeConfig>,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// The directly reachable database.
#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct TargetConfig {
    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub connection_string: SecretString,

    #[serde(default = "default_max_pool_size")]
    #[validate(range(min = 1, max = 1024))]
    pub max_pool_size: usize,

    #[serde(default = "default_acquire_timeout_ms")]
    #[validate(range(min = 1))]
    pub acquire_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_command_timeout_secs")]
    #[validate(range(min = 1))]
    pub command_timeout_secs: u64,
}

impl TargetConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: SecretString::from(connection_string.into()),
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct CacheConfig {
    /// TTL applied when a request enables caching without naming one.
    #[serde(default = "default_cache_minutes")]
    #[validate(range(min = 1))]
    pub default_minutes: u64,

    #[serde(default = "default_cache_max_entries")]
    #[validate(range(min = 1))]
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_minutes: DEFAULT_CACHE_MINUTES,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_minutes * 60)
    }
}

/// How operations reach a database that is not directly connected.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BridgeConfig {
    /// Forward through a foreign-server alias defined on the target.
    ForeignMapping { server_alias: String },
    /// Forward over HTTP to a relay that owns the foreign connection.
    Relay {
        endpoint: String,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            serialize_with = "serialize_optional_secret",
            deserialize_with = "deserialize_optional_secret"
        )]
        api_key: Option<SecretString>,
        #[serde(default = "default_relay_timeout_secs")]
        timeout_secs: u64,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG` when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_max_pool_size() -> usize {
    DEFAULT_MAX_POOL_SIZE
}

fn default_acquire_timeout_ms() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

fn default_cache_minutes() -> u64 {
    DEFAULT_CACHE_MINUTES
}

fn default_cache_max_entries() -> u64 {
    DEFAULT_CACHE_MAX_ENTRIES
}

fn default_relay_timeout_secs() -> u64 {
    DEFAULT_RELAY_TIMEOUT_SECS
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn validate_bridge(bridge: &BridgeConfig) -> Result<(), ValidationError> {
    match bridge {
        BridgeConfig::ForeignMapping { server_alias } => {
            let valid = !server_alias.is_empty()
                && server_alias
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');
            if valid {
                Ok(())
            } else {
                Err(ValidationError::new("invalid_server_alias"))
            }
        }
        BridgeConfig::Relay {
            endpoint,
            timeout_secs,
            ..
        } => {
            if *timeout_secs == 0 {
                return Err(ValidationError::new("invalid_relay_timeout"));
            }
            match url::Url::parse(endpoint) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
                _ => Err(ValidationError::new("invalid_relay_endpoint")),
            }
        }
    }
}

impl GatewayConfig {
    pub fn new(target: TargetConfig) -> Self {
        Self {
            target,
            cache: CacheConfig::default(),
            bridge: None,
            telemetry: TelemetryConfig::default(),
        }
    }

    /// Load from an optional file, then apply `CONDUIT__SECTION__KEY` environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = config::Config::builder();

        let builder = if std::path::Path::new(path).exists() {
            builder.add_source(config::File::with_name(path))
        } else {
            builder
        };

        // CONDUIT__TARGET__MAX_POOL_SIZE maps to target.max_pool_size
        let builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().context("Failed to build configuration")?;

        let gateway_config: GatewayConfig = cfg
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        gateway_config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {:?}", e))?;

        Ok(gateway_config)
    }
}
