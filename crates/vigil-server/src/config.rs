//! Monitor configuration.
//!
//! Configuration is layered, lowest precedence first:
//! - Built-in defaults
//! - TOML configuration file (`--config`, or the first default path found)
//! - Environment variables (`VIGIL__SECTION__KEY`, e.g. `VIGIL__BROKER__URL`)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use vigil_core::{RouterConfig, Signal, Thresholds, DEFAULT_WINDOW};
use vigil_transport::{BrokerEndpoint, ClientId, MqttConfig, DEFAULT_BROKER_URL};

/// Default config file locations, searched in order.
const CONFIG_PATHS: [&str; 3] = [
    "vigil.toml",
    "/etc/vigil/vigil.toml",
    "~/.config/vigil/vigil.toml",
];

/// Monitor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker connection.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Initial alert thresholds.
    #[serde(default)]
    pub thresholds: ThresholdsConfig,

    /// History retention.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Reconnect policy.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// HTTP surface.
    #[serde(default)]
    pub http: HttpConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker URL.
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// Client ID; generated per process when absent.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Client request queue capacity.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Threshold configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_gas_threshold")]
    pub gas: f64,

    #[serde(default = "default_temperature_threshold")]
    pub temperature: f64,

    #[serde(default = "default_humidity_threshold")]
    pub humidity: f64,
}

/// History configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Rolling window size per signal.
    #[serde(default = "default_window")]
    pub window: usize,

    /// Maximum notifications kept; unbounded when absent.
    #[serde(default)]
    pub max_notifications: Option<usize>,
}

/// Supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Start a new session after the current one disconnects.
    #[serde(default = "default_true")]
    pub reconnect: bool,

    /// Delay before reconnecting, in milliseconds.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Clear history when a new session starts.
    #[serde(default = "default_true")]
    pub reset_on_reconnect: bool,
}

/// HTTP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_broker_url() -> String {
    DEFAULT_BROKER_URL.to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    64
}

fn default_gas_threshold() -> f64 {
    Signal::Gas.default_threshold()
}

fn default_temperature_threshold() -> f64 {
    Signal::Temperature.default_threshold()
}

fn default_humidity_threshold() -> f64 {
    Signal::Humidity.default_threshold()
}

fn default_window() -> usize {
    DEFAULT_WINDOW
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay() -> u64 {
    5_000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            client_id: None,
            keep_alive_secs: default_keep_alive(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            gas: default_gas_threshold(),
            temperature: default_temperature_threshold(),
            humidity: default_humidity_threshold(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            max_notifications: None,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            reconnect_delay_ms: default_reconnect_delay(),
            reset_on_reconnect: true,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl ThresholdsConfig {
    /// Build the shared threshold set.
    #[must_use]
    pub fn build(&self) -> Arc<Thresholds> {
        Arc::new(Thresholds::from_values([
            (Signal::Gas, self.gas),
            (Signal::Temperature, self.temperature),
            (Signal::Humidity, self.humidity),
        ]))
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default path that
    /// exists, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be read or parsed, or if the
    /// result fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_default(),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            tracing::info!("Loading configuration from {}", file.display());
            builder = builder.add_source(
                config::File::new(&file.to_string_lossy(), config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix("VIGIL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn find_default() -> Option<PathBuf> {
        Self::find_first(&CONFIG_PATHS)
    }

    fn find_first(paths: &[&str]) -> Option<PathBuf> {
        paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise fail later at runtime.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        BrokerEndpoint::parse(&self.broker.url)
            .with_context(|| format!("Invalid broker URL: {}", self.broker.url))?;

        for (name, value) in [
            ("gas", self.thresholds.gas),
            ("temperature", self.thresholds.temperature),
            ("humidity", self.thresholds.humidity),
        ] {
            if !value.is_finite() {
                bail!("Threshold for {name} must be a finite number");
            }
        }

        if self.history.window == 0 {
            bail!("history.window must be at least 1");
        }
        if self.history.max_notifications == Some(0) {
            bail!("history.max_notifications must be at least 1 when set");
        }
        Ok(())
    }

    /// MQTT transport settings.
    #[must_use]
    pub fn mqtt(&self) -> MqttConfig {
        MqttConfig {
            url: self.broker.url.clone(),
            client_id: self
                .broker
                .client_id
                .clone()
                .map(ClientId::from)
                .unwrap_or_else(ClientId::generate),
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            channel_capacity: self.broker.channel_capacity,
        }
    }

    /// Router settings.
    #[must_use]
    pub fn router(&self) -> RouterConfig {
        RouterConfig {
            window: self.history.window,
            max_notifications: self.history.max_notifications,
            ..RouterConfig::default()
        }
    }

    /// Get the socket address to bind the HTTP surface to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.http.host, self.http.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.http.host, self.http.port))
    }
}
