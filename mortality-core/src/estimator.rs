//! Per-entry baseline estimation
//!
//! The estimator trims the observed series to the baseline window start,
//! asks the regression service for a fit and re-pads the answer onto the
//! full timeline. When the service is unusable (timeout, exhausted retries)
//! or the window is too long to send, it falls back to a flat band:
//! the window mean with bounds at two population standard deviations.

use crate::config::EstimatorConfig;
use crate::period::{Granularity, Label};
use crate::regression::{BaselineMethod, BaselineRequest, BaselineResponse, RegressionService};
pub use crate::series::BaselineSource;
use crate::series::{valid_values, value_at, Series};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Parameters shared by every entry of one baseline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaselineParams {
    /// 0-indexed, inclusive
    pub window_start: usize,
    pub window_end: usize,
    pub method: BaselineMethod,
    pub granularity: Granularity,
    pub cumulative: bool,
}

impl BaselineParams {
    pub fn window_len(&self) -> usize {
        self.window_end.saturating_sub(self.window_start) + 1
    }
}

/// Baseline series aligned to the full timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineResult {
    pub baseline: Series,
    pub lower: Series,
    pub upper: Series,
    pub zscore: Option<Series>,
    pub source: BaselineSource,
}

/// Why an entry was left without a baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AutoMethod,
    InvalidWindow { start: usize, end: usize, len: usize },
    EmptyWindow,
    InsufficientData { valid: usize, required: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AutoMethod => write!(f, "method 'auto' computes no baseline"),
            SkipReason::InvalidWindow { start, end, len } => {
                write!(f, "window [{}, {}] does not fit a series of {}", start, end, len)
            }
            SkipReason::EmptyWindow => write!(f, "baseline window has no values"),
            SkipReason::InsufficientData { valid, required } => write!(
                f,
                "baseline window has {} valid points, {} required",
                valid, required
            ),
        }
    }
}

/// Outcome of one estimation
#[derive(Debug, Clone, PartialEq)]
pub enum Estimate {
    Computed(BaselineResult),
    Skipped(SkipReason),
}

impl Estimate {
    pub fn result(&self) -> Option<&BaselineResult> {
        match self {
            Estimate::Computed(result) => Some(result),
            Estimate::Skipped(_) => None,
        }
    }
}

/// Computes baselines for single series
pub struct BaselineEstimator {
    service: Arc<dyn RegressionService>,
    config: EstimatorConfig,
}

impl BaselineEstimator {
    pub fn new(service: Arc<dyn RegressionService>, config: EstimatorConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Estimates the baseline of `observed` over `params`' window.
    ///
    /// Never fails: service errors degrade to the local fallback and
    /// unusable input is reported as [`Estimate::Skipped`].
    pub async fn estimate(
        &self,
        observed: &[Option<f64>],
        timeline: &[Label],
        params: &BaselineParams,
    ) -> Estimate {
        let window_values = match self.check_window(observed, params) {
            Ok(values) => values,
            Err(reason) => {
                warn!("Skipping baseline: {}", reason);
                metrics::counter!("baseline_skipped_total").increment(1);
                return Estimate::Skipped(reason);
            }
        };

        let cap = self
            .config
            .window_caps
            .for_granularity(params.granularity);
        if params.window_len() > cap {
            debug!(
                window = params.window_len(),
                cap, "Baseline window above service cap, using local fallback"
            );
            metrics::counter!("baseline_fallback_total").increment(1);
            return Estimate::Computed(fallback_baseline(observed, &window_values));
        }

        let request = build_request(observed, timeline, params);
        match self.service.fit(&request).await {
            Ok(response) => {
                metrics::counter!("baseline_remote_total").increment(1);
                Estimate::Computed(expand_response(
                    response,
                    params.window_start,
                    observed.len(),
                ))
            }
            Err(e) => {
                if e.is_timeout() {
                    warn!("Regression service timed out, using local fallback");
                } else {
                    warn!("Regression service failed ({}), using local fallback", e);
                }
                metrics::counter!("baseline_fallback_total").increment(1);
                Estimate::Computed(fallback_baseline(observed, &window_values))
            }
        }
    }

    /// Returns the valid window values or the reason to skip.
    fn check_window(
        &self,
        observed: &[Option<f64>],
        params: &BaselineParams,
    ) -> std::result::Result<Vec<f64>, SkipReason> {
        if params.method == BaselineMethod::Auto {
            return Err(SkipReason::AutoMethod);
        }
        if params.window_start > params.window_end || params.window_end >= observed.len() {
            return Err(SkipReason::InvalidWindow {
                start: params.window_start,
                end: params.window_end,
                len: observed.len(),
            });
        }

        let values = valid_values(&observed[params.window_start..=params.window_end]);
        if values.is_empty() {
            return Err(SkipReason::EmptyWindow);
        }
        if values.len() < self.config.min_valid_points {
            return Err(SkipReason::InsufficientData {
                valid: values.len(),
                required: self.config.min_valid_points,
            });
        }
        Ok(values)
    }
}

/// Builds the trimmed service request for one series.
pub fn build_request(
    observed: &[Option<f64>],
    timeline: &[Label],
    params: &BaselineParams,
) -> BaselineRequest {
    let start = params.window_start;
    let alignment_hint = timeline.get(start).and_then(|label| {
        params
            .granularity
            .alignment_hint(label)
            .map_err(|e| debug!("No alignment hint: {}", e))
            .ok()
    });

    BaselineRequest {
        series: observed[start..].to_vec(),
        baseline_start: 1,
        baseline_end: params.window_end - start + 1,
        method: params.method,
        seasonal_period: params.granularity.seasonal_period(),
        trend: params.method.has_trend(),
        cumulative: params.cumulative,
        alignment_hint,
    }
}

/// Re-pads a trimmed response onto a series of length `len`.
pub fn expand_response(response: BaselineResponse, offset: usize, len: usize) -> BaselineResult {
    let pad = |values: Vec<Option<f64>>| -> Series {
        let mut out = vec![None; offset];
        out.extend(values);
        out.resize(len, None);
        out
    };

    BaselineResult {
        baseline: pad(response.fitted),
        lower: pad(response.lower),
        upper: pad(response.upper),
        zscore: response.zscore.map(pad),
        source: BaselineSource::Remote,
    }
}

/// Flat mean ± 2σ band over the whole series.
///
/// σ is the population standard deviation of the valid window values.
pub fn fallback_baseline(observed: &[Option<f64>], window_values: &[f64]) -> BaselineResult {
    let len = observed.len();
    if window_values.is_empty() {
        return BaselineResult {
            baseline: vec![None; len],
            lower: vec![None; len],
            upper: vec![None; len],
            zscore: None,
            source: BaselineSource::Fallback,
        };
    }

    let n = window_values.len() as f64;
    let mean = window_values.iter().sum::<f64>() / n;
    let variance = window_values
        .iter()
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / n;
    let sd = variance.sqrt();

    let zscore = (0..len)
        .map(|i| {
            value_at(observed, i)
                .filter(|_| sd > 0.0)
                .map(|v| (v - mean) / sd)
        })
        .collect();

    BaselineResult {
        baseline: vec![Some(mean); len],
        lower: vec![Some(mean - 2.0 * sd); len],
        upper: vec![Some(mean + 2.0 * sd); len],
        zscore: Some(zscore),
        source: BaselineSource::Fallback,
    }
}
