use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub holds: HoldsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// No url means in-memory repositories
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct HoldsConfig {
    pub default_ttl_seconds: u64,
    pub max_hold_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

fn default_sweep_interval() -> u64 { 1000 }

impl HoldsConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_hold_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Catalog feed used when no database is configured
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CatalogConfig {
    pub seed_file: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `AERO_SERVER__PORT=8080`
            .add_source(config::Environment::with_prefix("AERO").separator("__"))
            .build()?;

        let cfg: Config = s.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let holds = &self.holds;
        if holds.default_ttl_seconds == 0 {
            return Err(invalid("holds.default_ttl_seconds must be positive"));
        }
        if holds.max_hold_seconds < holds.default_ttl_seconds {
            return Err(invalid("holds.max_hold_seconds must be at least holds.default_ttl_seconds"));
        }
        if holds.sweep_interval_ms == 0 {
            return Err(invalid("holds.sweep_interval_ms must be positive"));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections must be positive"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> config::ConfigError {
    config::ConfigError::Message(msg.to_string())
}
