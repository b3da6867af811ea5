use crate::{env::EnvSource, error::ConfigError};
use serde::Serialize;
use std::{path::PathBuf, time::Duration};
use tracing::debug;

pub const MIN_BATCH_SIZE: usize = 10;
pub const MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_BATCH_SIZE: usize = MAX_BATCH_SIZE;
pub const DEFAULT_LOG_RETENTION: usize = 5_000;
pub const DEFAULT_LOG_PAGE_SIZE: usize = 250;
pub const DEFAULT_IDLE_TICK_MS: u64 = 500;

pub const ENV_STATE_DIR: &str = "LISTMIG_STATE_DIR";
pub const ENV_BATCH_SIZE: &str = "LISTMIG_BATCH_SIZE";
pub const ENV_LOG_RETENTION: &str = "LISTMIG_LOG_RETENTION";
pub const ENV_LOG_PAGE_SIZE: &str = "LISTMIG_LOG_PAGE_SIZE";
pub const ENV_IDLE_TICK_MS: &str = "LISTMIG_IDLE_TICK_MS";

/// Process-wide engine settings. Per-run settings live in
/// `ImportSettings` instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    pub state_dir: PathBuf,
    pub batch_size: usize,
    pub log_retention: usize,
    pub log_page_size: usize,
    pub idle_tick: Duration,
}

impl EngineConfig {
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            log_retention: DEFAULT_LOG_RETENTION,
            log_page_size: DEFAULT_LOG_PAGE_SIZE,
            idle_tick: Duration::from_millis(DEFAULT_IDLE_TICK_MS),
        }
    }

    /// `~/.listmig/state`.
    pub fn default_state_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".listmig").join("state"))
            .ok_or(ConfigError::NoHomeDir)
    }

    /// Defaults overlaid with whatever `env` sets, then validated.
    pub fn from_env(env: &EnvSource) -> Result<Self, ConfigError> {
        let state_dir = match env.get(ENV_STATE_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => Self::default_state_dir()?,
        };

        let mut config = Self::with_state_dir(state_dir);
        if let Some(n) = parse_u64(env, ENV_BATCH_SIZE)? {
            config.batch_size = n as usize;
        }
        if let Some(n) = parse_u64(env, ENV_LOG_RETENTION)? {
            config.log_retention = n as usize;
        }
        if let Some(n) = parse_u64(env, ENV_LOG_PAGE_SIZE)? {
            config.log_page_size = n as usize;
        }
        if let Some(ms) = parse_u64(env, ENV_IDLE_TICK_MS)? {
            config.idle_tick = Duration::from_millis(ms);
        }

        config.validate()?;
        debug!(?config, "Loaded engine configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            ENV_BATCH_SIZE,
            self.batch_size as u64,
            MIN_BATCH_SIZE as u64,
            MAX_BATCH_SIZE as u64,
        )?;
        check_range(ENV_LOG_RETENTION, self.log_retention as u64, 1, u32::MAX as u64)?;
        check_range(ENV_LOG_PAGE_SIZE, self.log_page_size as u64, 1, 10_000)?;
        check_range(ENV_IDLE_TICK_MS, self.idle_tick.as_millis() as u64, 1, 60_000)?;
        Ok(())
    }
}

fn parse_u64(env: &EnvSource, key: &str) -> Result<Option<u64>, ConfigError> {
    env.get(key)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                expected: "unsigned integer",
            })
        })
        .transpose()
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            key: key.to_string(),
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_defaults() {
        let env = EnvSource::from_pairs([
            (ENV_STATE_DIR, "/tmp/listmig"),
            (ENV_BATCH_SIZE, "20"),
            (ENV_IDLE_TICK_MS, "50"),
        ]);

        let config = EngineConfig::from_env(&env).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/tmp/listmig"));
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.idle_tick, Duration::from_millis(50));
        assert_eq!(config.log_retention, DEFAULT_LOG_RETENTION);
    }

    #[test]
    fn batch_size_is_bounded() {
        for bad in ["9", "51"] {
            let env = EnvSource::from_pairs([(ENV_STATE_DIR, "/tmp/x"), (ENV_BATCH_SIZE, bad)]);
            let err = EngineConfig::from_env(&env).unwrap_err();
            assert!(matches!(err, ConfigError::OutOfRange { min: 10, max: 50, .. }));
        }
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        let env = EnvSource::from_pairs([(ENV_STATE_DIR, "/tmp/x"), (ENV_LOG_PAGE_SIZE, "lots")]);
        let err = EngineConfig::from_env(&env).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
