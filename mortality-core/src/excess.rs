//! Excess mortality derived from observed values and a baseline

use crate::estimator::BaselineResult;
use crate::series::{value_at, Entry, MetricFields, Series};

/// Excess series for one metric
#[derive(Debug, Clone, PartialEq)]
pub struct ExcessSeries {
    pub excess: Series,
    pub lower: Series,
    pub upper: Series,
}

/// Computes excess and excess bounds position by position.
///
/// Missing operands of the central excess count as 0. A bound is only
/// derived where the matching baseline bound exists; otherwise it stays
/// `None` and is never replaced by a number.
pub fn calculate(
    observed: &[Option<f64>],
    baseline: &[Option<f64>],
    baseline_lower: &[Option<f64>],
    baseline_upper: &[Option<f64>],
) -> ExcessSeries {
    let len = observed.len();
    let mut out = ExcessSeries {
        excess: Vec::with_capacity(len),
        lower: Vec::with_capacity(len),
        upper: Vec::with_capacity(len),
    };

    for i in 0..len {
        let obs = value_at(observed, i).unwrap_or(0.0);
        out.excess
            .push(Some(obs - value_at(baseline, i).unwrap_or(0.0)));
        out.lower.push(value_at(baseline_lower, i).map(|b| obs - b));
        out.upper.push(value_at(baseline_upper, i).map(|b| obs - b));
    }

    out
}

/// Writes the excess series of `fields` onto `entry` from its own baseline.
///
/// Returns `false` when the entry lacks the observed or baseline series.
pub fn apply(entry: &mut Entry, fields: &MetricFields) -> bool {
    let (Some(observed), Some(baseline)) = (entry.get(&fields.observed), entry.get(&fields.baseline))
    else {
        return false;
    };
    let len = observed.len();
    let missing = vec![None; len];
    let lower = entry.get(&fields.lower).unwrap_or(&missing);
    let upper = entry.get(&fields.upper).unwrap_or(&missing);

    let ExcessSeries {
        excess,
        lower,
        upper,
    } = calculate(observed, baseline, lower, upper);

    entry.set(fields.excess(), excess);
    entry.set(fields.excess_lower(), lower);
    entry.set(fields.excess_upper(), upper);
    true
}

/// Writes a baseline onto `entry`, then derives its excess.
pub fn apply_baseline(entry: &mut Entry, fields: &MetricFields, result: BaselineResult) {
    entry
        .baseline_sources
        .insert(fields.baseline.clone(), result.source);
    entry.set(fields.baseline.clone(), result.baseline);
    entry.set(fields.lower.clone(), result.lower);
    entry.set(fields.upper.clone(), result.upper);
    match result.zscore {
        Some(zscore) => entry.set(fields.zscore(), zscore),
        None => {
            entry.series.remove(&fields.zscore());
        }
    }
    apply(entry, fields);
}

/// Removes every baseline-derived series of `fields` from `entry`.
pub fn clear_baseline(entry: &mut Entry, fields: &MetricFields) {
    entry.baseline_sources.remove(&fields.baseline);
    for field in [
        fields.baseline.clone(),
        fields.lower.clone(),
        fields.upper.clone(),
        fields.zscore(),
        fields.excess(),
        fields.excess_lower(),
        fields.excess_upper(),
    ] {
        entry.series.remove(&field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_operands_count_as_zero() {
        let out = calculate(
            &[Some(10.0), None, Some(7.0)],
            &[Some(8.0), Some(5.0), None],
            &[Some(6.0), Some(3.0), None],
            &[None, Some(7.0), Some(1.0)],
        );
        assert_eq!(out.excess, vec![Some(2.0), Some(-5.0), Some(7.0)]);
        assert_eq!(out.lower, vec![Some(4.0), Some(-3.0), None]);
        assert_eq!(out.upper, vec![None, Some(-7.0), Some(6.0)]);
    }

    #[test]
    fn test_apply_requires_baseline() {
        let mut entry = Entry::new("USA", "all");
        entry.set("deaths", vec![Some(1.0)]);
        assert!(!apply(&mut entry, &MetricFields::for_metric("deaths")));
        assert!(!entry.has("deaths_excess"));
    }

    #[test]
    fn test_clear_baseline_keeps_observed() {
        let fields = MetricFields::for_metric("deaths");
        let mut entry = Entry::new("USA", "all");
        entry.set("deaths", vec![Some(3.0)]);
        apply_baseline(
            &mut entry,
            &fields,
            BaselineResult {
                baseline: vec![Some(1.0)],
                lower: vec![Some(0.0)],
                upper: vec![Some(2.0)],
                zscore: Some(vec![Some(1.5)]),
                source: crate::series::BaselineSource::Remote,
            },
        );
        assert!(entry.has("deaths_zscore"));

        clear_baseline(&mut entry, &fields);
        assert_eq!(entry.series.len(), 1);
        assert!(entry.has("deaths"));
        assert!(entry.baseline_source("deaths_baseline").is_none());
    }
}
