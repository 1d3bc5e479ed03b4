//! Chart payloads handed to the visualization layer
//!
//! Only the data side of a chart is built here: one dataset per entry with
//! the observed, baseline and excess series of a metric. Styling and
//! rendering live elsewhere.

use crate::cache::ResultCache;
use crate::fingerprint::{Fingerprint, FingerprintBuilder};
use crate::period::{Granularity, Label};
use crate::series::{BaselineSource, Entry, EntrySet, MetricFields, Series};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartDataset {
    pub country: String,
    pub age_group: String,
    pub observed: Series,
    pub baseline: Option<Series>,
    pub baseline_lower: Option<Series>,
    pub baseline_upper: Option<Series>,
    pub excess: Option<Series>,
    pub excess_lower: Option<Series>,
    pub excess_upper: Option<Series>,
    pub zscore: Option<Series>,
    /// Baseline is the flat fallback band rather than a fitted model.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPayload {
    pub metric: String,
    pub granularity: Granularity,
    pub labels: Vec<Label>,
    pub datasets: Vec<ChartDataset>,
}

impl ChartPayload {
    pub fn degraded_count(&self) -> usize {
        self.datasets.iter().filter(|d| d.degraded).count()
    }
}

fn dataset(entry: &Entry, fields: &MetricFields) -> Option<ChartDataset> {
    let observed = entry.get(&fields.observed)?.clone();
    let field = |name: &str| entry.get(name).cloned();

    Some(ChartDataset {
        country: entry.country.clone(),
        age_group: entry.age_group.clone(),
        observed,
        baseline: field(&fields.baseline),
        baseline_lower: field(&fields.lower),
        baseline_upper: field(&fields.upper),
        excess: field(&fields.excess()),
        excess_lower: field(&fields.excess_lower()),
        excess_upper: field(&fields.excess_upper()),
        zscore: field(&fields.zscore()),
        degraded: entry.baseline_source(&fields.baseline) == Some(BaselineSource::Fallback),
    })
}

/// Builds the payload for `fields`; entries without the observed series are left out.
pub fn build_payload(entries: &EntrySet, fields: &MetricFields) -> ChartPayload {
    ChartPayload {
        metric: fields.observed.clone(),
        granularity: entries.granularity,
        labels: entries.timeline.clone(),
        datasets: entries
            .entries()
            .iter()
            .filter_map(|entry| dataset(entry, fields))
            .collect(),
    }
}

/// Cache key over everything a payload is derived from.
///
/// Every value of every charted series is hashed, so a hit means the
/// payload inputs are identical. Keying costs one pass over the data.
pub fn payload_fingerprint(entries: &EntrySet, fields: &MetricFields) -> Fingerprint {
    let names = [
        fields.observed.clone(),
        fields.baseline.clone(),
        fields.lower.clone(),
        fields.upper.clone(),
        fields.excess(),
        fields.excess_lower(),
        fields.excess_upper(),
        fields.zscore(),
    ];

    let mut builder = FingerprintBuilder::new("charts")
        .str(entries.granularity.as_str())
        .strs(entries.timeline.as_slice())
        .strs(&names[..])
        .u64(entries.len() as u64);

    for entry in entries.entries() {
        builder = builder
            .str(&entry.country)
            .str(&entry.age_group)
            .bool(entry.baseline_source(&fields.baseline) == Some(BaselineSource::Fallback));
        for name in &names {
            builder = match entry.get(name) {
                Some(series) => builder.bool(true).series(series),
                None => builder.bool(false),
            };
        }
    }
    builder.finish()
}

/// Returns the cached payload for identical inputs, building it otherwise.
pub fn build_payload_cached(
    cache: &ResultCache<Arc<ChartPayload>>,
    entries: &EntrySet,
    fields: &MetricFields,
) -> Arc<ChartPayload> {
    let key = payload_fingerprint(entries, fields);
    if let Some(payload) = cache.get(&key) {
        debug!(key = key.short(), "Chart payload served from cache");
        return payload;
    }

    let payload = Arc::new(build_payload(entries, fields));
    cache.set(key, payload.clone());
    payload
}
