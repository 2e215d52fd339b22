use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
}

/// Push gateway settings. The gateway itself is injected by the embedding
/// application; these knobs describe its batch contract.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Maximum messages per multicast call imposed by the gateway.
    #[serde(default = "default_batch_size")]
    pub max_batch_size: usize,
}

/// Pacing for a send run. Injected into the dispatcher so tests can run
/// with tiny batches and no delay.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Recipients per multicast call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between consecutive batches, skipped after the last one.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl DispatchConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_batch_size() -> usize {
    500
}

fn default_batch_delay_ms() -> u64 {
    1000
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("database.pool_size", 10)?
            .set_default("database.connect_timeout_seconds", 5)?
            .set_default("gateway.max_batch_size", 500)?
            .set_default("dispatch.batch_size", 500)?
            .set_default("dispatch.batch_delay_ms", 1000)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // DATABASE_URL, DISPATCH_BATCH_SIZE, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_batch_size(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}
