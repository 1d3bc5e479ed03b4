//! Aligns raw per-entry observations onto the canonical timeline

use crate::period::{Granularity, Label};
use crate::series::{Entry, EntrySet, Series};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Raw observations for one entry, keyed by native period label
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEntry {
    pub country: String,
    pub age_group: String,
    /// Native period labels; may be empty when values are pre-aligned.
    #[serde(default)]
    pub dates: Vec<Label>,
    pub fields: BTreeMap<String, Series>,
}

/// Label to position lookup over a label sequence
pub struct LabelIndex<'a> {
    positions: HashMap<&'a str, usize>,
}

impl<'a> LabelIndex<'a> {
    pub fn new(labels: &'a [Label]) -> Self {
        let mut positions = HashMap::with_capacity(labels.len());
        for (i, label) in labels.iter().enumerate() {
            // First occurrence wins on duplicate labels.
            positions.entry(label.as_str()).or_insert(i);
        }
        Self { positions }
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.positions.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Aligns one field of a raw entry to `timeline`.
///
/// The result always has exactly `timeline.len()` values; unmatched periods
/// become `None`.
pub fn align_series(timeline: &[Label], dates: &[Label], values: &[Option<f64>]) -> Series {
    let n = timeline.len();

    if values.len() == n {
        match dates.first() {
            None => return values.to_vec(),
            Some(first) if timeline.first() == Some(first) => return values.to_vec(),
            Some(first) => {
                // Same length, later start: shift right by the leading gap.
                let offset = timeline.iter().take_while(|l| *l != first).count();
                if offset < n {
                    debug!(offset, "Left-padding series that starts after the timeline");
                    let mut out = vec![None; offset];
                    out.extend(values.iter().take(n - offset).copied());
                    return out;
                }
            }
        }
    }

    let lookup = LabelIndex::new(dates);
    timeline
        .iter()
        .map(|label| {
            lookup
                .position(label)
                .and_then(|i| values.get(i).copied().flatten())
        })
        .collect()
}

/// Aligns every field of a raw entry.
pub fn align_entry(timeline: &[Label], raw: &RawEntry) -> Entry {
    let mut entry = Entry::new(raw.country.clone(), raw.age_group.clone());
    for (field, values) in &raw.fields {
        entry.set(field.clone(), align_series(timeline, &raw.dates, values));
    }
    entry
}

/// Aligns a whole raw dataset into an entry arena.
pub fn align_all(granularity: Granularity, timeline: Vec<Label>, raw: &[RawEntry]) -> EntrySet {
    let mut set = EntrySet::new(granularity, timeline);
    for raw_entry in raw {
        let entry = align_entry(&set.timeline, raw_entry);
        set.push(entry);
    }
    debug!(
        entries = set.len(),
        periods = set.timeline_len(),
        "Aligned raw entries"
    );
    set
}
