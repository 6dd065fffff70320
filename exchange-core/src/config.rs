use std::time::Duration;

use config::{Config, ConfigError, Environment as EnvSource, File, FileFormat};
use exchange_common::{ExchangeConfig, ExchangeError, VenueSections};
use serde::Deserialize;

use crate::service::ResilienceConfig;

fn default_rebuild_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceSettings {
    #[serde(default = "default_rebuild_delay_ms")]
    pub rebuild_delay_ms: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            rebuild_delay_ms: default_rebuild_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// One `[exchange.<venue>]` table; exactly one must be present
    #[serde(default)]
    pub exchange: VenueSections,
    #[serde(default)]
    pub resilience: ResilienceSettings,
}

impl Settings {
    /// Load `config/{RUN_MODE}.toml`, then apply `EXCHANGE__...` overrides
    /// (`EXCHANGE__RESILIENCE__REBUILD_DELAY_MS=500`).
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(true))
            .add_source(
                EnvSource::with_prefix("EXCHANGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        s.try_deserialize()
    }

    /// Settings from TOML text, without file or environment lookup
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }

    pub fn exchange_config(&self) -> Result<ExchangeConfig, ExchangeError> {
        ExchangeConfig::try_from(self.exchange.clone())
    }

    pub fn resilience_config(&self) -> ResilienceConfig {
        ResilienceConfig::default()
            .with_rebuild_delay(Duration::from_millis(self.resilience.rebuild_delay_ms))
    }
}
