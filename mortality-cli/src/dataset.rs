use anyhow::{bail, Context, Result};
use mortality_core::{Granularity, Label, LabelIndex, RawEntry};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Input file for `run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub granularity: Granularity,
    /// Canonical timeline
    pub labels: Vec<Label>,
    pub entries: Vec<RawEntry>,
}

impl Dataset {
    pub fn from_json(content: &str) -> Result<Self> {
        let dataset: Dataset = serde_json::from_str(content).context("Invalid dataset JSON")?;
        if dataset.labels.is_empty() {
            bail!("Dataset has an empty timeline");
        }
        Ok(dataset)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&content)
    }
}

/// Resolves a window bound given as a timeline label or a 0-based index.
///
/// Labels win, so a yearly `2015` means the period, not position 2015.
pub fn resolve_position(timeline: &[Label], value: &str) -> Result<usize> {
    if let Some(position) = LabelIndex::new(timeline).position(value) {
        return Ok(position);
    }
    match value.parse::<usize>() {
        Ok(index) if index < timeline.len() => Ok(index),
        Ok(index) => bail!(
            "Window index {} is outside a timeline of {} periods",
            index,
            timeline.len()
        ),
        Err(_) => bail!("Unknown window label '{}'", value),
    }
}
