//! Runs the estimator across every entry of an [`EntrySet`]
//!
//! Jobs own a copy of their observed series and report back the arena index
//! they were built from; only the orchestrator loop writes entries, one slot
//! per completed job, so no two computations ever touch the same entry.

use crate::cache::ResultCache;
use crate::config::OrchestratorConfig;
use crate::estimator::{BaselineEstimator, BaselineParams, BaselineResult, BaselineSource, Estimate};
use crate::excess;
use crate::fingerprint::{Fingerprint, FingerprintBuilder};
use crate::period::Label;
use crate::series::{EntryId, EntrySet, MetricFields, Series};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Summary of one orchestrated run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub total: usize,
    pub remote: usize,
    pub fallback: usize,
    pub skipped: usize,
    pub cache_hits: usize,
    pub elapsed: Duration,
}

impl RunReport {
    fn new(run_id: Uuid, total: usize) -> Self {
        Self {
            run_id,
            total,
            remote: 0,
            fallback: 0,
            skipped: 0,
            cache_hits: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// True when at least one entry got the flat fallback band.
    pub fn degraded(&self) -> bool {
        self.fallback > 0
    }
}

/// Cache key of one entry's baseline.
pub fn baseline_fingerprint(
    observed: &[Option<f64>],
    window_label: Option<&str>,
    params: &BaselineParams,
) -> Fingerprint {
    FingerprintBuilder::new("baselines")
        .series(observed)
        .u64(params.window_start as u64)
        .u64(params.window_end as u64)
        .str(params.method.as_str())
        .str(params.granularity.as_str())
        .u64(params.granularity.seasonal_period() as u64)
        .bool(params.method.has_trend())
        .bool(params.cumulative)
        .str(window_label.unwrap_or_default())
        .finish()
}

struct Job {
    id: EntryId,
    key: String,
    observed: Series,
}

struct JobOutcome {
    id: EntryId,
    estimate: Estimate,
    cached: bool,
}

/// Fans baseline estimation out over all entries with bounded concurrency
pub struct BaselineOrchestrator {
    estimator: BaselineEstimator,
    cache: Option<Arc<ResultCache<BaselineResult>>>,
    config: OrchestratorConfig,
}

impl BaselineOrchestrator {
    pub fn new(estimator: BaselineEstimator, config: OrchestratorConfig) -> Self {
        Self {
            estimator,
            cache: None,
            config,
        }
    }

    /// Serves repeated computations from `cache`.
    pub fn with_cache(mut self, cache: Arc<ResultCache<BaselineResult>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn estimator(&self) -> &BaselineEstimator {
        &self.estimator
    }

    /// Computes baselines and excess for every entry.
    pub async fn run(
        &self,
        entries: &mut EntrySet,
        fields: &MetricFields,
        params: &BaselineParams,
    ) -> RunReport {
        self.run_with_progress(entries, fields, params, |_, _| {})
            .await
    }

    /// Like [`run`](Self::run), reporting `(completed, total)` once up front
    /// and after every finished entry.
    pub async fn run_with_progress<F>(
        &self,
        entries: &mut EntrySet,
        fields: &MetricFields,
        params: &BaselineParams,
        mut progress: F,
    ) -> RunReport
    where
        F: FnMut(usize, usize),
    {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let total = entries.len();
        let mut report = RunReport::new(run_id, total);
        let timeline: Vec<Label> = entries.timeline.clone();

        info!(
            %run_id,
            entries = total,
            method = %params.method,
            granularity = %params.granularity,
            "Starting baseline run"
        );
        progress(0, total);

        let mut completed = 0;
        let mut jobs = Vec::with_capacity(total);
        let mut missing = Vec::new();
        for (id, entry) in entries.iter() {
            match entry.get(&fields.observed) {
                Some(observed) => jobs.push(Job {
                    id,
                    key: entry.key(),
                    observed: observed.clone(),
                }),
                None => {
                    warn!(%run_id, entry = %entry.key(), field = %fields.observed, "Entry has no observed series");
                    missing.push(id);
                }
            }
        }
        for id in missing {
            if let Some(entry) = entries.get_mut(id) {
                excess::clear_baseline(entry, fields);
            }
            report.skipped += 1;
            completed += 1;
            progress(completed, total);
        }

        let concurrency = self.config.max_concurrency.max(1);
        let timeline_ref = &timeline;
        let mut outcomes = stream::iter(jobs)
            .map(|job| async move { self.estimate_job(job, timeline_ref, params).await })
            .buffer_unordered(concurrency);

        while let Some(outcome) = outcomes.next().await {
            if outcome.cached {
                report.cache_hits += 1;
            }
            match outcome.estimate {
                Estimate::Computed(result) => {
                    match result.source {
                        BaselineSource::Remote => report.remote += 1,
                        BaselineSource::Fallback => report.fallback += 1,
                    }
                    if let Some(entry) = entries.get_mut(outcome.id) {
                        excess::apply_baseline(entry, fields, result);
                    }
                }
                Estimate::Skipped(_) => {
                    // Results of earlier runs must not outlive a skip.
                    if let Some(entry) = entries.get_mut(outcome.id) {
                        excess::clear_baseline(entry, fields);
                    }
                    report.skipped += 1;
                }
            }
            completed += 1;
            progress(completed, total);
        }

        report.elapsed = started.elapsed();
        info!(
            %run_id,
            remote = report.remote,
            fallback = report.fallback,
            skipped = report.skipped,
            cache_hits = report.cache_hits,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Baseline run complete"
        );
        report
    }

    async fn estimate_job(&self, job: Job, timeline: &[Label], params: &BaselineParams) -> JobOutcome {
        let window_label = timeline.get(params.window_start).map(String::as_str);
        let key = self
            .cache
            .as_ref()
            .map(|_| baseline_fingerprint(&job.observed, window_label, params));

        if let (Some(cache), Some(key)) = (self.cache.as_ref(), key.as_ref()) {
            if let Some(result) = cache.get(key) {
                debug!(entry = %job.key, key = key.short(), "Baseline served from cache");
                metrics::counter!("baseline_cache_hits_total").increment(1);
                return JobOutcome {
                    id: job.id,
                    estimate: Estimate::Computed(result),
                    cached: true,
                };
            }
        }

        let estimate = self.estimator.estimate(&job.observed, timeline, params).await;
        if let Estimate::Skipped(ref reason) = estimate {
            debug!(entry = %job.key, "No baseline: {}", reason);
        }

        // Fallback bands are cheap and may reflect a transient outage.
        if let (Some(cache), Some(key), Estimate::Computed(result)) =
            (self.cache.as_ref(), key, &estimate)
        {
            if result.source == BaselineSource::Remote {
                cache.set(key, result.clone());
            }
        }

        JobOutcome {
            id: job.id,
            estimate,
            cached: false,
        }
    }
}
