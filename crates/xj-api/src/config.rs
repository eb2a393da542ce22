//! Configuration layer for joins.
//!
//! A [`MapJoinConfig`] can be deserialized, built from a string option map, or
//! overlaid from `XJ_*` environment variables. It resolves into the runner,
//! schedule options and cache settings the dispatcher consumes.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use xj_cache::DirCacheStore;
use xj_core::MismatchPolicy;
use xj_dispatch::{CacheSettings, ScheduleOptions};
use xj_runtime::Runner;

pub const ENV_RUNNER: &str = "XJ_RUNNER";
pub const ENV_THREADS: &str = "XJ_THREADS";
pub const ENV_SEED: &str = "XJ_SEED";
pub const ENV_CACHE_DIR: &str = "XJ_CACHE_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapJoinConfig {
    pub mismatch_policy: MismatchPolicy,
    pub shuffle: bool,
    pub seed: Option<u64>,
    pub runner: String,
    pub threads: Option<usize>,
    pub progress: bool,
    /// Caching is disabled when unset.
    pub cache_dir: Option<PathBuf>,
    pub cache_prefix: String,
}

impl Default for MapJoinConfig {
    fn default() -> Self {
        Self {
            mismatch_policy: MismatchPolicy::Fail,
            shuffle: true,
            seed: None,
            runner: "sequential".to_owned(),
            threads: None,
            progress: false,
            cache_dir: None,
            cache_prefix: String::new(),
        }
    }
}

impl MapJoinConfig {
    /// Defaults overridden by `options`.
    pub fn from_options(options: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_options(options)?;
        Ok(config)
    }

    pub fn apply_options(&mut self, options: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        for (key, value) in options {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Overlay the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Overlay `XJ_*` variables resolved through `lookup`.
    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        for (variable, key) in [
            (ENV_RUNNER, "runner"),
            (ENV_THREADS, "threads"),
            (ENV_SEED, "seed"),
            (ENV_CACHE_DIR, "cache_dir"),
        ] {
            if let Some(value) = lookup(variable) {
                tracing::debug!(variable, %value, "config override from environment");
                self.set(key, &value)?;
            }
        }
        Ok(self)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            "mismatch_policy" => {
                self.mismatch_policy =
                    MismatchPolicy::from_name(value).ok_or_else(|| invalid(key, value, "fail or intersect"))?;
            }
            "shuffle" => self.shuffle = parse_bool(key, value)?,
            "progress" => self.progress = parse_bool(key, value)?,
            "seed" => {
                self.seed = optional(value)
                    .map(|raw| raw.parse().map_err(|_| invalid(key, value, "an unsigned integer")))
                    .transpose()?;
            }
            "threads" => {
                self.threads = optional(value)
                    .map(|raw| {
                        raw.parse::<usize>()
                            .ok()
                            .filter(|&threads| threads > 0)
                            .ok_or_else(|| invalid(key, value, "a positive integer"))
                    })
                    .transpose()?;
            }
            "runner" => self.runner = value.to_owned(),
            "cache_dir" => self.cache_dir = optional(value).map(PathBuf::from),
            "cache_prefix" => self.cache_prefix = value.to_owned(),
            _ => {
                return Err(ConfigError::UnknownKey {
                    key: key.to_owned(),
                });
            }
        }
        Ok(())
    }

    pub fn build_runner(&self) -> Result<Runner, ConfigError> {
        Ok(Runner::from_name(&self.runner, self.threads)?)
    }

    #[must_use]
    pub fn schedule_options(&self) -> ScheduleOptions {
        ScheduleOptions {
            shuffle: self.shuffle,
            seed: self.seed,
            progress: self.progress,
        }
    }

    /// Open the configured cache directory, creating it if needed.
    pub fn open_cache(&self) -> Result<Option<CacheSettings>, ConfigError> {
        let Some(dir) = &self.cache_dir else {
            return Ok(None);
        };
        let store = DirCacheStore::open(dir, self.cache_prefix.clone())?;
        Ok(Some(CacheSettings::new(Arc::new(store))))
    }
}

fn invalid(key: &str, value: &str, expected: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
        expected,
    }
}

fn optional(value: &str) -> Option<&str> {
    match value {
        "" | "none" | "None" => None,
        other => Some(other),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "a boolean")),
    }
}
