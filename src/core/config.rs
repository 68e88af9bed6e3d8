//! Configuration management for the harvester.
//!
//! Supports:
//! - YAML files
//! - Environment variable and CLI overrides (applied by the CLI layer)
//! - Validation and defaults

use crate::core::attributes::{AttributeValue, Attributes};
use crate::core::{HarvestError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default metric ingest endpoint
pub const DEFAULT_METRICS_URL: &str = "https://metric-api.newrelic.com/metric/v1";

/// Default span ingest endpoint
pub const DEFAULT_SPANS_URL: &str = "https://trace-api.newrelic.com/trace/v1";

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Harvest behaviour
    pub harvester: HarvesterConfig,
    /// Ingest endpoint overrides
    pub endpoints: EndpointConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Harvest behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvesterConfig {
    /// Ingest API key. Nothing is collected while this is empty.
    pub api_key: String,
    /// Attributes added to the `common` block of every batch
    pub common_attributes: Attributes,
    /// Time between scheduled harvests; zero disables the schedule
    #[serde(with = "humantime_serde")]
    pub harvest_period: Duration,
    /// Upper bound on a single harvest, retries included
    #[serde(with = "humantime_serde")]
    pub harvest_timeout: Duration,
    /// Wait between delivery attempts
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    /// Log uncompressed request bodies at trace level
    pub audit: bool,
}

/// Ingest endpoint overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Metrics endpoint
    pub metrics_url: Option<String>,
    /// Spans endpoint
    pub spans_url: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// JSON output instead of the compact format
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        HarvesterConfig {
            api_key: String::new(),
            common_attributes: Attributes::new(),
            harvest_period: Duration::from_secs(5),
            harvest_timeout: Duration::from_secs(15),
            retry_backoff: Duration::from_secs(3),
            audit: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Default config file location, `~/.config/telemetry-harvester/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| {
            home.join(".config")
                .join("telemetry-harvester")
                .join("config.yaml")
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.harvester.harvest_timeout.is_zero() {
            return Err(HarvestError::config("harvest_timeout must be greater than 0"));
        }

        if self.harvester.retry_backoff.is_zero() {
            return Err(HarvestError::config("retry_backoff must be greater than 0"));
        }

        for (field, url) in [
            ("metrics_url", &self.endpoints.metrics_url),
            ("spans_url", &self.endpoints.spans_url),
        ] {
            if let Some(url) = url {
                validate_url(field, url)?;
            }
        }

        Ok(())
    }

    /// Whether data is collected at all
    pub fn collection_enabled(&self) -> bool {
        !self.harvester.api_key.is_empty()
    }

    /// Metrics endpoint, override or default
    pub fn metrics_url(&self) -> &str {
        self.endpoints
            .metrics_url
            .as_deref()
            .unwrap_or(DEFAULT_METRICS_URL)
    }

    /// Spans endpoint, override or default
    pub fn spans_url(&self) -> &str {
        self.endpoints
            .spans_url
            .as_deref()
            .unwrap_or(DEFAULT_SPANS_URL)
    }
}

fn validate_url(field: &str, url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| HarvestError::config(format!("Invalid {}: {}: {}", field, url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(HarvestError::config(format!(
            "{} must be an http(s) URL, got scheme '{}'",
            field, scheme
        ))),
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| HarvestError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set the API key
    pub fn api_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.harvester.api_key = key.into();
        self
    }

    /// Add a common attribute
    pub fn common_attribute<K: Into<String>, V: Into<AttributeValue>>(
        mut self,
        key: K,
        value: V,
    ) -> Self {
        self.config
            .harvester
            .common_attributes
            .insert(key.into(), value.into());
        self
    }

    /// Set the harvest period; zero means manual harvests only
    pub fn harvest_period(mut self, period: Duration) -> Self {
        self.config.harvester.harvest_period = period;
        self
    }

    /// Set the harvest timeout
    pub fn harvest_timeout(mut self, timeout: Duration) -> Self {
        self.config.harvester.harvest_timeout = timeout;
        self
    }

    /// Set the retry backoff
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.harvester.retry_backoff = backoff;
        self
    }

    /// Enable audit logging
    pub fn audit(mut self, enable: bool) -> Self {
        self.config.harvester.audit = enable;
        self
    }

    /// Override the metrics endpoint
    pub fn metrics_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.endpoints.metrics_url = Some(url.into());
        self
    }

    /// Override the spans endpoint
    pub fn spans_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.endpoints.spans_url = Some(url.into());
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
