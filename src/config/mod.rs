//! Configuration management for afk-rotator
//!
//! This module handles loading and validating configuration from TOML or JSON
//! files and environment variables. Keys are snake_case; the camelCase
//! spellings (`intervalMs`, `autoReconnect`, ...) are accepted as aliases so
//! existing `settings.json` style files load unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::auth::{AuthSequencer, ResponseClassifier, StepConfig};
use crate::identity::names::{NameGenerator, NameStyle, COMPOSITE_NUMBER_MAX};
use crate::identity::IdentityProvider;
use crate::scheduler::{ReconnectPolicy, SchedulerConfig};
use crate::session::SessionOptions;
use crate::storage::RotationStateStore;
use crate::transport::{ConnectParams, Endpoint};
use crate::utils::backoff::Backoff;

/// Rotation interval used when `interval_ms` is 0 or absent (3 hours)
pub const DEFAULT_ROTATION_INTERVAL_MS: u64 = 3 * 60 * 60 * 1000;

/// Widest number the composite name style appends
const COMPOSITE_NUMBER_DIGITS: usize = (COMPOSITE_NUMBER_MAX - 1).ilog10() as usize + 1;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "AFK_ROTATOR_";

// ============================================================================
// Errors
// ============================================================================

/// Malformed or missing configuration; fatal at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML/JSON for this schema
    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// A value is missing or out of range
    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    /// Create an invalid-value error
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Configuration structures
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity rotation
    #[serde(default)]
    pub rotation: RotationConfig,

    /// Remote endpoint
    pub endpoint: EndpointConfig,

    /// Default identity and secret
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Reconnect policy after unexpected disconnects
    #[serde(default, alias = "autoReconnect")]
    pub auto_reconnect: ReconnectConfig,

    /// Session timeouts and transport tuning
    #[serde(default)]
    pub session: SessionConfig,

    /// Register/login exchange run after each connect
    #[serde(default, alias = "authSequence")]
    pub auth_sequence: AuthSequenceConfig,

    /// Durable rotation cursor
    #[serde(default)]
    pub state: StateConfig,

    /// Liveness HTTP endpoint
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Movement/chat/anti-idle toggles, passed through to the transport untouched
    #[serde(default)]
    pub behavior: BTreeMap<String, serde_json::Value>,
}

/// Identity rotation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Whether identities rotate at all
    #[serde(default)]
    pub enabled: bool,

    /// Candidate identities; absent means synthesize names
    #[serde(default)]
    pub pool: Option<Vec<String>>,

    /// Milliseconds between rotations; 0 means the 3 hour default
    #[serde(default, alias = "intervalMs")]
    pub interval_ms: u64,

    /// Pause between closing the old session and starting the rotated one
    #[serde(default = "default_settle_ms", alias = "settleMs")]
    pub settle_ms: u64,

    /// Synthetic name generation
    #[serde(default)]
    pub names: NamesConfig,
}

/// Synthetic name settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamesConfig {
    /// `suffix` (prefix + random alphanumerics) or `composite` (adjective + noun + number)
    #[serde(default)]
    pub style: NameStyle,

    /// Prefix for the `suffix` style
    #[serde(default = "default_name_prefix")]
    pub prefix: String,

    /// Number of random characters for the `suffix` style
    #[serde(default = "default_suffix_len", alias = "suffixLen")]
    pub suffix_len: usize,

    /// Names are truncated to this many characters
    #[serde(default = "default_max_len", alias = "maxLen")]
    pub max_len: usize,

    /// Fixed RNG seed for reproducible names
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Remote endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Host name or address
    pub host: String,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Protocol/game version string, passed to the transport
    #[serde(default, alias = "protocolVersion", alias = "version")]
    pub protocol_version: Option<String>,
}

/// How the transport authenticates the identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No upstream account; the server trusts the name
    #[default]
    Offline,
    /// Upstream account login
    Microsoft,
}

/// Credentials configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Default identity used when no pool identity applies
    #[serde(default, alias = "username")]
    pub identity: Option<String>,

    /// Secret for the auth sequence (and the transport, if it needs one)
    #[serde(default, alias = "password")]
    pub secret: Option<String>,

    /// Transport auth mode
    #[serde(default, alias = "authMode", alias = "auth")]
    pub auth_mode: AuthMode,
}

/// Reconnect configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Reconnect after unexpected disconnects
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base delay before the first reconnect attempt
    #[serde(default = "default_reconnect_delay_ms", alias = "delayMs")]
    pub delay_ms: u64,

    /// Upper bound for the backoff delay
    #[serde(default = "default_reconnect_max_delay_ms", alias = "maxDelayMs")]
    pub max_delay_ms: u64,

    /// Growth factor per consecutive failure (1.0 = fixed delay)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// Session timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bound on connection establishment
    #[serde(default = "default_connect_timeout_ms", alias = "connectTimeoutMs")]
    pub connect_timeout_ms: u64,

    /// Bound on waiting for a graceful close
    #[serde(default = "default_close_timeout_ms", alias = "closeTimeoutMs")]
    pub close_timeout_ms: u64,

    /// Line transport kick notice pattern (first capture group is the reason)
    #[serde(default, alias = "kickPattern")]
    pub kick_pattern: Option<String>,
}

/// Auth sequence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSequenceConfig {
    /// Run the register/login exchange after each connect
    #[serde(default)]
    pub enabled: bool,

    /// How long to wait for a classifiable reply per step
    #[serde(default = "default_auth_timeout_ms", alias = "timeoutMs")]
    pub timeout_ms: u64,

    /// Registration step
    #[serde(default = "StepConfig::default_register")]
    pub register: StepConfig,

    /// Login step
    #[serde(default = "StepConfig::default_login")]
    pub login: StepConfig,
}

/// Rotation state persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Path of the rotation cursor file; absent keeps the cursor in memory
    #[serde(default = "default_state_path")]
    pub path: Option<PathBuf>,
}

/// Liveness endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Serve the liveness route
    #[serde(default)]
    pub enabled: bool,

    /// Bind address
    #[serde(default = "default_liveness_bind")]
    pub bind: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}
fn default_settle_ms() -> u64 {
    2_000
}
fn default_name_prefix() -> String {
    String::from("AFK_")
}
fn default_suffix_len() -> usize {
    6
}
fn default_max_len() -> usize {
    16
}
fn default_port() -> u16 {
    25565
}
fn default_reconnect_delay_ms() -> u64 {
    10_000
}
fn default_reconnect_max_delay_ms() -> u64 {
    300_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_connect_timeout_ms() -> u64 {
    30_000
}
fn default_close_timeout_ms() -> u64 {
    5_000
}
fn default_auth_timeout_ms() -> u64 {
    10_000
}
fn default_state_path() -> Option<PathBuf> {
    Some(PathBuf::from("data/rotation-state.json"))
}
fn default_liveness_bind() -> String {
    String::from("0.0.0.0:8080")
}
fn default_log_level() -> String {
    String::from("info")
}
fn default_log_format() -> String {
    String::from("text")
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pool: None,
            interval_ms: 0,
            settle_ms: default_settle_ms(),
            names: NamesConfig::default(),
        }
    }
}

impl Default for NamesConfig {
    fn default() -> Self {
        Self {
            style: NameStyle::default(),
            prefix: default_name_prefix(),
            suffix_len: default_suffix_len(),
            max_len: default_max_len(),
            seed: None,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: default_reconnect_delay_ms(),
            max_delay_ms: default_reconnect_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            kick_pattern: None,
        }
    }
}

impl Default for AuthSequenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: default_auth_timeout_ms(),
            register: StepConfig::default_register(),
            login: StepConfig::default_login(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_liveness_bind(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl NamesConfig {
    /// Build a generator from these settings
    pub fn generator(&self) -> NameGenerator {
        let generator = match self.seed {
            Some(seed) => NameGenerator::seeded(self.style, seed),
            None => NameGenerator::from_entropy(self.style),
        };
        generator
            .with_prefix(self.prefix.clone())
            .with_suffix_len(self.suffix_len)
            .with_max_len(self.max_len)
    }
}

impl RotationConfig {
    /// Interval between rotations, applying the 3 hour default for 0
    #[must_use]
    pub fn interval(&self) -> Duration {
        if self.interval_ms == 0 {
            Duration::from_millis(DEFAULT_ROTATION_INTERVAL_MS)
        } else {
            Duration::from_millis(self.interval_ms)
        }
    }

    /// Whether a non-empty pool is configured
    pub fn has_pool_entries(&self) -> bool {
        self.pool.as_ref().is_some_and(|p| !p.is_empty())
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Create a minimal configuration for an endpoint; everything else defaults
    pub fn for_endpoint(host: impl Into<String>, port: u16) -> Self {
        Self {
            rotation: RotationConfig::default(),
            endpoint: EndpointConfig {
                host: host.into(),
                port,
                protocol_version: None,
            },
            credentials: CredentialsConfig::default(),
            auto_reconnect: ReconnectConfig::default(),
            session: SessionConfig::default(),
            auth_sequence: AuthSequenceConfig::default(),
            state: StateConfig::default(),
            liveness: LivenessConfig::default(),
            logging: LoggingConfig::default(),
            behavior: BTreeMap::new(),
        }
    }

    /// Load configuration from a file (`.json` is parsed as JSON, anything else as TOML)
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&content).map_err(|reason| ConfigError::Parse {
                path: path.to_path_buf(),
                reason,
            })
        } else {
            Self::from_toml_str(&content).map_err(|reason| ConfigError::Parse {
                path: path.to_path_buf(),
                reason,
            })
        }
    }

    /// Parse TOML content
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Parse JSON content
    pub fn from_json_str(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| e.to_string())
    }

    /// Load, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AFK_ROTATOR_*` environment variables on top of the file values
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let var = |name: &str| std::env::var(format!("{ENV_PREFIX}{name}")).ok();

        if let Some(host) = var("HOST") {
            self.endpoint.host = host;
        }
        if let Some(port) = var("PORT") {
            self.endpoint.port = port.parse().map_err(|_| {
                ConfigError::invalid("endpoint.port", format!("'{port}' is not a valid port"))
            })?;
        }
        if let Some(identity) = var("IDENTITY") {
            self.credentials.identity = Some(identity);
        }
        if let Some(secret) = var("SECRET") {
            self.credentials.secret = Some(secret);
        }
        if let Some(path) = var("STATE_PATH") {
            self.state.path = Some(PathBuf::from(path));
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.host.trim().is_empty() {
            return Err(ConfigError::invalid("endpoint.host", "must not be empty"));
        }
        if self.endpoint.port == 0 {
            return Err(ConfigError::invalid("endpoint.port", "must be greater than 0"));
        }

        if let Some(pool) = &self.rotation.pool {
            if let Some(i) = pool.iter().position(|name| name.trim().is_empty()) {
                return Err(ConfigError::invalid(
                    format!("rotation.pool[{i}]"),
                    "identities must not be empty",
                ));
            }
        }

        let has_default = self
            .credentials
            .identity
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty());
        let synthetic = self.rotation.enabled && self.rotation.pool.is_none();
        if !has_default && !synthetic && !self.rotation.has_pool_entries() {
            return Err(ConfigError::invalid(
                "credentials.identity",
                "a default identity is required unless rotation supplies one",
            ));
        }
        if !has_default && !self.rotation.enabled {
            return Err(ConfigError::invalid(
                "credentials.identity",
                "a default identity is required when rotation is disabled",
            ));
        }

        let names = &self.rotation.names;
        if names.suffix_len == 0 {
            return Err(ConfigError::invalid(
                "rotation.names.suffix_len",
                "must be greater than 0",
            ));
        }
        if names.max_len == 0 {
            return Err(ConfigError::invalid(
                "rotation.names.max_len",
                "must be greater than 0",
            ));
        }
        match names.style {
            NameStyle::Suffix if names.prefix.chars().count() >= names.max_len => {
                return Err(ConfigError::invalid(
                    "rotation.names.prefix",
                    format!("must be shorter than max_len ({})", names.max_len),
                ));
            }
            NameStyle::Composite if names.max_len <= COMPOSITE_NUMBER_DIGITS => {
                return Err(ConfigError::invalid(
                    "rotation.names.max_len",
                    format!("must leave room for words beside the {COMPOSITE_NUMBER_DIGITS}-digit number"),
                ));
            }
            _ => {}
        }

        if self.auto_reconnect.multiplier < 1.0 || !self.auto_reconnect.multiplier.is_finite() {
            return Err(ConfigError::invalid(
                "auto_reconnect.multiplier",
                "must be a finite number >= 1.0",
            ));
        }
        if self.auto_reconnect.max_delay_ms < self.auto_reconnect.delay_ms {
            return Err(ConfigError::invalid(
                "auto_reconnect.max_delay_ms",
                "must not be smaller than delay_ms",
            ));
        }

        if self.session.connect_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "session.connect_timeout_ms",
                "must be greater than 0",
            ));
        }
        if let Some(pattern) = &self.session.kick_pattern {
            regex::Regex::new(pattern).map_err(|e| {
                ConfigError::invalid("session.kick_pattern", e.to_string())
            })?;
        }

        if self.auth_sequence.enabled {
            if self.credentials.secret.as_deref().unwrap_or("").is_empty() {
                return Err(ConfigError::invalid(
                    "credentials.secret",
                    "required when auth_sequence is enabled",
                ));
            }
            if self.auth_sequence.timeout_ms == 0 {
                return Err(ConfigError::invalid(
                    "auth_sequence.timeout_ms",
                    "must be greater than 0",
                ));
            }
            ResponseClassifier::compile(&self.auth_sequence.register)
                .map_err(|e| ConfigError::invalid("auth_sequence.register", e.to_string()))?;
            ResponseClassifier::compile(&self.auth_sequence.login)
                .map_err(|e| ConfigError::invalid("auth_sequence.login", e.to_string()))?;
        }

        if self.liveness.enabled {
            self.liveness_addr()?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Derived component settings
    // ------------------------------------------------------------------------

    /// Parsed liveness bind address
    pub fn liveness_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.liveness.bind.parse().map_err(|_| {
            ConfigError::invalid(
                "liveness.bind",
                format!("'{}' is not a socket address", self.liveness.bind),
            )
        })
    }

    /// Connect template; the session manager fills in the identity per start
    pub fn connect_template(&self) -> ConnectParams {
        ConnectParams {
            endpoint: Endpoint {
                host: self.endpoint.host.clone(),
                port: self.endpoint.port,
                protocol_version: self.endpoint.protocol_version.clone(),
            },
            identity: self.credentials.identity.clone().unwrap_or_default(),
            secret: self.credentials.secret.clone(),
            auth_mode: self.credentials.auth_mode,
            behavior: self.behavior.clone(),
        }
    }

    /// Session manager timeouts
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: Duration::from_millis(self.session.connect_timeout_ms),
            close_timeout: Duration::from_millis(self.session.close_timeout_ms),
        }
    }

    /// Scheduler settings
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            rotation_enabled: self.rotation.enabled,
            interval: self.rotation.interval(),
            settle: Duration::from_millis(self.rotation.settle_ms),
            default_identity: self
                .credentials
                .identity
                .clone()
                .filter(|id| !id.trim().is_empty()),
            reconnect: ReconnectPolicy {
                enabled: self.auto_reconnect.enabled,
                backoff: Backoff::new(
                    self.auto_reconnect.delay_ms,
                    self.auto_reconnect.max_delay_ms,
                    self.auto_reconnect.multiplier,
                ),
            },
        }
    }

    /// Synthetic name generator; seeded when `rotation.names.seed` is set
    pub fn name_generator(&self) -> NameGenerator {
        self.rotation.names.generator()
    }

    /// Rotation cursor store for `state.path`
    pub fn state_store(&self) -> RotationStateStore {
        RotationStateStore::from_path(self.state.path.as_deref())
    }

    /// Identity provider: the pool when one is configured, synthetic names otherwise
    pub fn identity_provider(&self) -> IdentityProvider {
        match &self.rotation.pool {
            Some(pool) => IdentityProvider::pool(pool.clone(), self.state_store()),
            None => IdentityProvider::synthetic(self.name_generator()),
        }
    }

    /// Auth sequencer, if enabled
    pub fn auth_sequencer(&self) -> Result<Option<AuthSequencer>, ConfigError> {
        if !self.auth_sequence.enabled {
            return Ok(None);
        }
        let secret = self.credentials.secret.clone().unwrap_or_default();
        let sequencer = AuthSequencer::new(
            &self.auth_sequence.register,
            &self.auth_sequence.login,
            secret,
            Duration::from_millis(self.auth_sequence.timeout_ms),
        )
        .map_err(|e| ConfigError::invalid("auth_sequence", e.to_string()))?;
        Ok(Some(sequencer))
    }
}
