//! Entry and series model shared by the pipeline stages

use crate::period::{Granularity, Label};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One nullable value per timeline label
pub type Series = Vec<Option<f64>>;

/// Reads a series value, treating NaN the same as a missing point.
#[inline]
pub fn value_at(series: &[Option<f64>], index: usize) -> Option<f64> {
    series.get(index).copied().flatten().filter(|v| !v.is_nan())
}

/// Valid (present, non-NaN) values of a slice
pub fn valid_values(series: &[Option<f64>]) -> Vec<f64> {
    series
        .iter()
        .filter_map(|v| v.filter(|x| !x.is_nan()))
        .collect()
}

/// Names of the series fields that belong to one metric
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricFields {
    pub observed: String,
    pub baseline: String,
    pub lower: String,
    pub upper: String,
}

impl MetricFields {
    pub fn new(
        observed: impl Into<String>,
        baseline: impl Into<String>,
        lower: impl Into<String>,
        upper: impl Into<String>,
    ) -> Self {
        Self {
            observed: observed.into(),
            baseline: baseline.into(),
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    /// Conventional field names for a metric, e.g. `deaths_baseline_lower`.
    pub fn for_metric(metric: &str) -> Self {
        Self::new(
            metric,
            format!("{metric}_baseline"),
            format!("{metric}_baseline_lower"),
            format!("{metric}_baseline_upper"),
        )
    }

    pub fn excess(&self) -> String {
        format!("{}_excess", self.observed)
    }

    pub fn excess_lower(&self) -> String {
        format!("{}_excess_lower", self.observed)
    }

    pub fn excess_upper(&self) -> String {
        format!("{}_excess_upper", self.observed)
    }

    pub fn zscore(&self) -> String {
        format!("{}_zscore", self.observed)
    }
}

/// Where a baseline came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineSource {
    Remote,
    Fallback,
}

/// One (age group, country) unit with its named series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub country: String,
    pub age_group: String,
    pub series: BTreeMap<String, Series>,
    /// Source of each baseline field written onto this entry
    #[serde(default)]
    pub baseline_sources: BTreeMap<String, BaselineSource>,
}

impl Entry {
    pub fn new(country: impl Into<String>, age_group: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            age_group: age_group.into(),
            series: BTreeMap::new(),
            baseline_sources: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Series> {
        self.series.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, series: Series) {
        self.series.insert(field.into(), series);
    }

    pub fn has(&self, field: &str) -> bool {
        self.series.contains_key(field)
    }

    pub fn baseline_source(&self, baseline_field: &str) -> Option<BaselineSource> {
        self.baseline_sources.get(baseline_field).copied()
    }

    /// Human readable key used in logs and chart datasets
    pub fn key(&self) -> String {
        format!("{}/{}", self.country, self.age_group)
    }
}

/// Index of an entry inside an [`EntrySet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub usize);

/// Arena of entries that share one canonical timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySet {
    pub granularity: Granularity,
    pub timeline: Vec<Label>,
    entries: Vec<Entry>,
}

impl EntrySet {
    pub fn new(granularity: Granularity, timeline: Vec<Label>) -> Self {
        Self {
            granularity,
            timeline,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: Entry) -> EntryId {
        self.entries.push(entry);
        EntryId(self.entries.len() - 1)
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id.0)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.entries.get_mut(id.0)
    }

    pub fn find(&self, country: &str, age_group: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|e| e.country == country && e.age_group == age_group)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        self.entries.iter().enumerate().map(|(i, e)| (EntryId(i), e))
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn timeline_len(&self) -> usize {
        self.timeline.len()
    }
}
