//! Command-line interface for the harvester binary.
//!
//! Reads JSON-lines records from stdin, aggregates them and ships them on
//! the configured schedule. On EOF or Ctrl-C the scheduler is stopped and a
//! final harvest flushes whatever is still buffered.

use crate::core::config::{Config, ConfigBuilder};
use crate::core::{HarvestError, Result};
use crate::harvester::Harvester;
use crate::ingest;
use crate::metrics::MetricAggregator;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Aggregate metrics and spans from stdin and ship them as compressed JSON
#[derive(Parser, Debug)]
#[command(name = "telemetry-harvester")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/telemetry-harvester/config.yaml)
    #[arg(short, long, env = "HARVESTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Ingest API key; nothing is sent without one
    #[arg(long, env = "NEW_RELIC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Cluster name added to every batch as `cluster.name`
    #[arg(long, env = "NEW_RELIC_CLUSTER_NAME")]
    pub cluster_name: Option<String>,

    /// Seconds between harvests; 0 sends only on exit
    #[arg(long, env = "NEW_RELIC_HARVEST_PERIOD_SECS")]
    pub harvest_period_secs: Option<u64>,

    /// Metrics endpoint override
    #[arg(long, env = "NEW_RELIC_METRICS_URL")]
    pub metrics_url: Option<String>,

    /// Spans endpoint override
    #[arg(long, env = "NEW_RELIC_SPANS_URL")]
    pub spans_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, env = "NEW_RELIC_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables
    /// 3. Config file
    /// 4. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => Some(path.clone()),
            None => Config::default_path().filter(|path| path.exists()),
        };

        if let Some(path) = config_path {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    builder = builder.from_yaml(&content)?;
                },
                Err(e) if self.config.is_some() => {
                    return Err(HarvestError::config(format!(
                        "Failed to read config file {:?}: {}",
                        path, e
                    )));
                },
                Err(_) => {},
            }
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(key) = &self.api_key {
            builder = builder.api_key(key.as_str());
        }
        if let Some(cluster) = &self.cluster_name {
            builder = builder.common_attribute("cluster.name", cluster.as_str());
        }
        if let Some(secs) = self.harvest_period_secs {
            builder = builder.harvest_period(Duration::from_secs(secs));
        }
        if let Some(url) = &self.metrics_url {
            builder = builder.metrics_url(url.as_str());
        }
        if let Some(url) = &self.spans_url {
            builder = builder.spans_url(url.as_str());
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging based on configuration.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let log_level = if self.debug || config.debug {
            "debug"
        } else {
            config.logging.level.as_str()
        };

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
        let registry = tracing_subscriber::registry().with(filter);

        let result = if config.logging.structured {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_writer(std::io::stderr),
                )
                .try_init()
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr)
                        .compact(),
                )
                .try_init()
        };

        result.map_err(|e| HarvestError::config(format!("Failed to initialize logging: {}", e)))
    }
}

/// Run the harvester until stdin closes or Ctrl-C.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;

    if cli.check_config {
        println!("Configuration is valid!");
        println!(
            "  API key: {}",
            if config.collection_enabled() { "set" } else { "unset" }
        );
        println!("  Harvest period: {:?}", config.harvester.harvest_period);
        println!("  Harvest timeout: {:?}", config.harvester.harvest_timeout);
        println!("  Metrics endpoint: {}", config.metrics_url());
        println!("  Spans endpoint: {}", config.spans_url());
        return Ok(());
    }

    cli.init_logging(&config)?;

    let aggregator = MetricAggregator::new();
    let harvester = Harvester::builder(config)
        .before_harvest(aggregator.harvest_hook())
        .build()?;

    if !harvester.collects_metrics() {
        tracing::warn!("No API key configured, recorded telemetry will be discarded");
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = ingest::read_records(stdin, &aggregator, &harvester) => {
            let stats = result?;
            tracing::info!(accepted = stats.accepted, rejected = stats.rejected, "Input closed, stopping...");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping...");
        }
    }

    harvester.shutdown().await?;
    let summary = harvester.harvest_now().await;
    tracing::info!(
        delivered = summary.delivered,
        rejected = summary.rejected,
        abandoned = summary.abandoned,
        "Final harvest complete"
    );

    Ok(())
}
