//! Configuration for the health monitor service

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the health monitor
#[derive(Debug, Clone, Parser)]
#[command(name = "health-monitor")]
#[command(about = "Ingests device telemetry and serves the current record over HTTP")]
pub struct Config {
    /// NATS server URL
    #[arg(long, env, default_value = "nats://localhost:4222")]
    pub nats_url: String,

    /// Path to NATS credentials file
    #[arg(long, env)]
    pub nats_creds_path: Option<String>,

    /// Telemetry topic filter in MQTT form (e.g. health_monitor/device01/#)
    #[arg(long, env = "TELEMETRY_TOPIC", default_value = "health_monitor/device01/#")]
    pub topic: String,

    /// JSON file mirroring the current record
    #[arg(long, env = "TELEMETRY_DATA_FILE", default_value = "data.json")]
    pub data_file: PathBuf,

    /// HTTP bind address
    #[arg(long, env, default_value = "0.0.0.0:5000")]
    pub bind_addr: String,

    /// Maximum record age, in seconds, for the device to count as connected
    #[arg(long, env, default_value_t = 5)]
    pub liveness_threshold_secs: u64,

    /// Output logs in JSON format
    #[arg(long, env)]
    pub log_json: bool,
}

impl Config {
    /// Parse configuration from command-line args and environment variables
    pub fn parse_config() -> Self {
        Config::parse()
    }

    /// NATS subject for the configured topic filter
    pub fn subject_filter(&self) -> String {
        mqtt_filter_to_subject(&self.topic)
    }

    pub fn liveness_threshold(&self) -> Duration {
        Duration::from_secs(self.liveness_threshold_secs)
    }
}

/// Translate an MQTT topic filter into the NATS subject the NATS MQTT
/// gateway publishes it under.
pub fn mqtt_filter_to_subject(topic: &str) -> String {
    topic
        .trim_matches('/')
        .split('/')
        .map(|level| match level {
            "#" => ">",
            "+" => "*",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(".")
}
