//! Layered pipeline configuration
//!
//! Sources, lowest precedence first: built-in defaults, an optional file
//! (TOML, YAML or JSON by extension), then `MORTALITY_*` environment
//! variables using `__` as the nesting separator, e.g.
//! `MORTALITY_SERVICE__ENDPOINT` or `MORTALITY_CACHES__BASELINES__CAPACITY`.

use crate::cache::CacheConfig;
use crate::period::Granularity;
use crate::Result;
use config as config_rs;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Regression service connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the regression service
    pub endpoint: String,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Retries after the first attempt for non-timeout failures
    pub max_retries: u32,
    /// Fixed delay between retries in milliseconds
    pub retry_delay_ms: u64,
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://stats.mortality.watch".to_string(),
            timeout_ms: 30_000,
            max_retries: 2,
            retry_delay_ms: 1_000,
        }
    }
}

/// Largest baseline window (in periods) sent to the service per granularity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowCaps {
    pub weekly: usize,
    pub monthly: usize,
    pub quarterly: usize,
    pub yearly: usize,
    pub fluseason: usize,
    pub midyear: usize,
}

impl WindowCaps {
    pub fn for_granularity(&self, granularity: Granularity) -> usize {
        match granularity {
            Granularity::Weekly => self.weekly,
            Granularity::Monthly => self.monthly,
            Granularity::Quarterly => self.quarterly,
            Granularity::Yearly => self.yearly,
            Granularity::FluSeason => self.fluseason,
            Granularity::MidYear => self.midyear,
        }
    }
}

impl Default for WindowCaps {
    fn default() -> Self {
        Self {
            weekly: 520,
            monthly: 120,
            quarterly: 40,
            yearly: 30,
            fluseason: 30,
            midyear: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Minimum valid points inside the baseline window
    pub min_valid_points: usize,
    pub window_caps: WindowCaps,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_valid_points: 3,
            window_caps: WindowCaps::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum estimator calls in flight
    pub max_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_concurrency: 8 }
    }
}

/// The three cache instances owned by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachesConfig {
    pub baselines: CacheConfig,
    pub charts: CacheConfig,
    pub metadata: CacheConfig,
}

impl Default for CachesConfig {
    fn default() -> Self {
        Self {
            baselines: CacheConfig::new(1000, Duration::from_secs(60 * 60)),
            charts: CacheConfig::new(200, Duration::from_secs(5 * 60)),
            metadata: CacheConfig::new(100, Duration::from_secs(24 * 60 * 60)),
        }
    }
}

/// Main configuration for the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub service: ServiceConfig,
    pub estimator: EstimatorConfig,
    pub orchestrator: OrchestratorConfig,
    pub caches: CachesConfig,
}

impl PipelineConfig {
    /// Builds the layered configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config_rs::Config::builder().add_source(config_rs::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config_rs::File::from(path).required(true));
        }

        builder = builder.add_source(
            config_rs::Environment::with_prefix("MORTALITY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}
