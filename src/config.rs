use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::lock::LockPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    /// `wait` or `fail_fast`
    pub lock_mode: String,
    pub lock_timeout_ms: u64,
    /// Decimal places commissions are rounded to
    pub commission_scale: u32,
    pub max_conflict_retries: u32,
    pub run_migrations: bool,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let settings = config::Config::builder()
            .set_default("database_url", "postgresql://localhost/backoffice")?
            .set_default("max_connections", 20)?
            .set_default("min_connections", 2)?
            .set_default("acquire_timeout_secs", 30)?
            .set_default("lock_mode", "wait")?
            .set_default("lock_timeout_ms", 5000)?
            .set_default("commission_scale", 2)?
            .set_default("max_conflict_retries", 2)?
            .set_default("run_migrations", true)?
            .add_source(config::Environment::with_prefix("LEDGER").try_parsing(true))
            .set_override_option("database_url", std::env::var("DATABASE_URL").ok())?
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.min_connections > self.max_connections {
            return Err(AppError::Config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.commission_scale > 10 {
            return Err(AppError::Config(format!(
                "commission_scale {} is out of range (0-10)",
                self.commission_scale
            )));
        }
        self.lock_policy().map(|_| ())
    }

    pub fn lock_policy(&self) -> AppResult<LockPolicy> {
        match self.lock_mode.to_lowercase().as_str() {
            "wait" => Ok(LockPolicy::Wait {
                timeout: Duration::from_millis(self.lock_timeout_ms),
            }),
            "fail_fast" | "failfast" => Ok(LockPolicy::FailFast),
            other => Err(AppError::Config(format!("Unknown lock mode: {}", other))),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/backoffice".to_string(),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_secs: 30,
            lock_mode: "wait".to_string(),
            lock_timeout_ms: 5000,
            commission_scale: 2,
            max_conflict_retries: 2,
            run_migrations: true,
        }
    }
}
