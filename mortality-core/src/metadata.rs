//! Reference metadata describing a canonical timeline

use crate::cache::ResultCache;
use crate::fingerprint::FingerprintBuilder;
use crate::period::{Granularity, Label};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineInfo {
    pub granularity: Granularity,
    pub periods: usize,
    pub first: Option<Label>,
    pub last: Option<Label>,
    pub seasonal_period: u8,
    /// Alignment hint of the first label, when it parses
    pub start_hint: Option<String>,
    /// Labels that do not parse for the granularity
    pub invalid_labels: Vec<Label>,
}

pub fn describe_timeline(granularity: Granularity, timeline: &[Label]) -> TimelineInfo {
    let invalid_labels = timeline
        .iter()
        .filter(|label| granularity.alignment_hint(label).is_err())
        .cloned()
        .collect();

    TimelineInfo {
        granularity,
        periods: timeline.len(),
        first: timeline.first().cloned(),
        last: timeline.last().cloned(),
        seasonal_period: granularity.seasonal_period(),
        start_hint: timeline
            .first()
            .and_then(|label| granularity.alignment_hint(label).ok()),
        invalid_labels,
    }
}

pub fn describe_timeline_cached(
    cache: &ResultCache<TimelineInfo>,
    granularity: Granularity,
    timeline: &[Label],
) -> TimelineInfo {
    let key = FingerprintBuilder::new("metadata")
        .str(granularity.as_str())
        .strs(timeline)
        .finish();

    if let Some(info) = cache.get(&key) {
        return info;
    }
    let info = describe_timeline(granularity, timeline);
    cache.set(key, info.clone());
    info
}
