//! Comparison Module
//! Latest value per group against the previous available date.

use super::aggregator::{AggregateRow, MetricSpec};
use chrono::{Days, NaiveDate};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub group: String,
    /// Date the current values come from.
    pub date: NaiveDate,
    pub current: Vec<f64>,
    /// Values at the previous available date inside the window.
    pub previous: Option<Vec<f64>>,
}

/// Compares each group's most recent date with its previous one.
///
/// Only dates within `lookback_days` of the overall latest date are considered.
/// Groups are ordered by the current value of `sort_metric` (index into
/// `metrics`), descending, ties by group name. NaN sorts last.
pub fn compare_latest(
    rows: &[AggregateRow],
    group_index: usize,
    date_index: usize,
    metrics: &[&MetricSpec],
    lookback_days: u32,
    sort_metric: usize,
) -> Vec<ComparisonRow> {
    let dated: Vec<(NaiveDate, &AggregateRow)> = rows
        .iter()
        .filter_map(|r| {
            NaiveDate::parse_from_str(r.key.get(date_index), "%Y-%m-%d")
                .ok()
                .map(|d| (d, r))
        })
        .collect();
    let Some(latest) = dated.iter().map(|(d, _)| *d).max() else {
        return Vec::new();
    };
    let cutoff = latest
        .checked_sub_days(Days::new(u64::from(lookback_days)))
        .unwrap_or(NaiveDate::MIN);

    let mut groups: BTreeMap<&str, BTreeMap<NaiveDate, Vec<&AggregateRow>>> = BTreeMap::new();
    for (date, row) in dated.into_iter().filter(|(d, _)| *d >= cutoff) {
        groups
            .entry(row.key.get(group_index))
            .or_default()
            .entry(date)
            .or_default()
            .push(row);
    }

    let collapse = |rows: &[&AggregateRow]| -> Vec<f64> {
        metrics
            .iter()
            .map(|m| m.rollup.combine(rows.iter().map(|r| r.metric(&m.name))))
            .collect()
    };

    let mut out: Vec<ComparisonRow> = groups
        .into_iter()
        .filter_map(|(group, by_date)| {
            let mut recent = by_date.iter().rev();
            let (date, current) = recent.next()?;
            Some(ComparisonRow {
                group: group.to_string(),
                date: *date,
                current: collapse(current.as_slice()),
                previous: recent.next().map(|(_, rows)| collapse(rows.as_slice())),
            })
        })
        .collect();

    out.sort_by(|a, b| {
        let va = a.current.get(sort_metric).copied().unwrap_or(f64::NAN);
        let vb = b.current.get(sort_metric).copied().unwrap_or(f64::NAN);
        descending_nan_last(va, vb).then_with(|| a.group.cmp(&b.group))
    });
    out
}

fn descending_nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}
