//! Mortality baselines: aligns observed mortality series, estimates expected
//! baselines through a regression service and derives excess mortality.

pub mod aligner;
pub mod cache;
pub mod chart;
pub mod config;
pub mod errors;
pub mod estimator;
pub mod excess;
pub mod fingerprint;
pub mod metadata;
pub mod orchestrator;
pub mod period;
pub mod regression;
pub mod series;

// Re-exports
pub use aligner::{align_all, align_series, LabelIndex, RawEntry};
pub use cache::{CacheConfig, CacheStats, ResultCache};
pub use chart::{ChartDataset, ChartPayload};
pub use config::PipelineConfig;
pub use errors::{MortalityError, Result};
pub use estimator::{BaselineEstimator, BaselineParams, BaselineResult, Estimate, SkipReason};
pub use fingerprint::{Fingerprint, FingerprintBuilder};
pub use metadata::TimelineInfo;
pub use orchestrator::{BaselineOrchestrator, RunReport};
pub use period::{Granularity, Label};
pub use regression::{BaselineMethod, RegressionService, StatsClient};
pub use series::{BaselineSource, Entry, EntryId, EntrySet, MetricFields, Series};

use crate::config::CachesConfig;
use std::sync::Arc;
use tracing::info;

/// The cache instances shared by every pipeline stage
pub struct Caches {
    pub baselines: Arc<ResultCache<BaselineResult>>,
    pub charts: Arc<ResultCache<Arc<ChartPayload>>>,
    pub metadata: Arc<ResultCache<TimelineInfo>>,
}

impl Caches {
    pub fn new(config: &CachesConfig) -> Self {
        Self {
            baselines: Arc::new(ResultCache::new("baselines", config.baselines.clone())),
            charts: Arc::new(ResultCache::new("charts", config.charts.clone())),
            metadata: Arc::new(ResultCache::new("metadata", config.metadata.clone())),
        }
    }

    pub fn stats(&self) -> Vec<CacheStats> {
        vec![
            self.baselines.stats(),
            self.charts.stats(),
            self.metadata.stats(),
        ]
    }

    pub fn invalidate_all(&self) {
        self.baselines.invalidate();
        self.charts.invalidate();
        self.metadata.invalidate();
    }
}

/// Main pipeline interface
pub struct MortalityPipeline {
    config: PipelineConfig,
    caches: Caches,
    orchestrator: BaselineOrchestrator,
}

impl MortalityPipeline {
    /// Creates a pipeline backed by the HTTP regression service.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let client = StatsClient::new(config.service.clone())?;
        Ok(Self::with_service(config, Arc::new(client)))
    }

    /// Creates a pipeline backed by any regression service.
    pub fn with_service(config: PipelineConfig, service: Arc<dyn RegressionService>) -> Self {
        let caches = Caches::new(&config.caches);
        let estimator = BaselineEstimator::new(service, config.estimator.clone());
        let orchestrator = BaselineOrchestrator::new(estimator, config.orchestrator.clone())
            .with_cache(caches.baselines.clone());

        info!(
            endpoint = %config.service.endpoint,
            max_concurrency = config.orchestrator.max_concurrency,
            "Pipeline initialized"
        );

        Self {
            config,
            caches,
            orchestrator,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    /// Aligns raw entries onto `timeline`.
    pub fn align(
        &self,
        granularity: Granularity,
        timeline: Vec<Label>,
        raw: &[RawEntry],
    ) -> EntrySet {
        align_all(granularity, timeline, raw)
    }

    /// Describes the timeline of `entries`, memoized.
    pub fn timeline_info(&self, entries: &EntrySet) -> TimelineInfo {
        metadata::describe_timeline_cached(&self.caches.metadata, entries.granularity, &entries.timeline)
    }

    /// Computes baseline and excess series for every entry.
    pub async fn compute_baselines(
        &self,
        entries: &mut EntrySet,
        fields: &MetricFields,
        params: &BaselineParams,
    ) -> RunReport {
        self.orchestrator.run(entries, fields, params).await
    }

    /// Same as [`compute_baselines`](Self::compute_baselines) with a
    /// `(completed, total)` progress callback.
    pub async fn compute_baselines_with_progress<F>(
        &self,
        entries: &mut EntrySet,
        fields: &MetricFields,
        params: &BaselineParams,
        progress: F,
    ) -> RunReport
    where
        F: FnMut(usize, usize),
    {
        self.orchestrator
            .run_with_progress(entries, fields, params, progress)
            .await
    }

    /// Chart payload for one metric, memoized.
    pub fn chart_payload(&self, entries: &EntrySet, fields: &MetricFields) -> Arc<ChartPayload> {
        chart::build_payload_cached(&self.caches.charts, entries, fields)
    }

    pub fn cache_stats(&self) -> Vec<CacheStats> {
        self.caches.stats()
    }
}
