//! Period Rollup Module
//! Day, week, month and total rows for a date-keyed aggregate, newest first.

use super::aggregator::{AggregateRow, MetricSpec};
use chrono::{Datelike, IsoWeek, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    Day,
    Week,
    Month,
    Total,
}

/// One rolled-up row; `values` follows the order of the requested metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodRow {
    pub kind: PeriodKind,
    pub label: String,
    pub values: Vec<f64>,
}

pub const TOTAL_LABEL: &str = "TOTAL";

/// Builds the period table.
///
/// Rows sharing a date are first collapsed with each metric's rollup. The latest
/// month lists its days (newest first), then one subtotal per ISO week touched by
/// that month, then the month total. Earlier months only contribute a total, and
/// only when every calendar day of the month is present. A grand total closes
/// the table.
pub fn period_rows(rows: &[AggregateRow], date_index: usize, metrics: &[&MetricSpec]) -> Vec<PeriodRow> {
    let daily = collapse_by_date(rows, date_index, metrics);
    let Some(latest) = daily.keys().next_back().copied() else {
        return Vec::new();
    };

    let mut months: BTreeMap<(i32, u32), Vec<NaiveDate>> = BTreeMap::new();
    for date in daily.keys() {
        months.entry((date.year(), date.month())).or_default().push(*date);
    }

    let mut out = Vec::new();
    for (&(year, month), dates) in months.iter().rev() {
        let month_label = format!("{:04}/{:02}", year, month);
        if (year, month) == (latest.year(), latest.month()) {
            for date in dates.iter().rev() {
                out.push(PeriodRow {
                    kind: PeriodKind::Day,
                    label: date.format("%Y-%m-%d").to_string(),
                    values: daily[date].clone(),
                });
            }

            let mut weeks: Vec<IsoWeek> = Vec::new();
            for date in dates.iter().rev() {
                let week = date.iso_week();
                if !weeks.contains(&week) {
                    weeks.push(week);
                }
            }
            for week in weeks {
                // A week spanning a month boundary is totalled over all its days.
                let days: Vec<&NaiveDate> = daily.keys().filter(|d| d.iso_week() == week).collect();
                let (Some(first), Some(last)) = (days.first(), days.last()) else {
                    continue;
                };
                out.push(PeriodRow {
                    kind: PeriodKind::Week,
                    label: format!("{}~{}", first.format("%m/%d"), last.format("%m/%d")),
                    values: combine(&daily, days.iter().copied(), metrics),
                });
            }

            out.push(PeriodRow {
                kind: PeriodKind::Month,
                label: month_label,
                values: combine(&daily, dates.iter(), metrics),
            });
        } else if dates.len() as u32 == days_in_month(year, month) {
            out.push(PeriodRow {
                kind: PeriodKind::Month,
                label: month_label,
                values: combine(&daily, dates.iter(), metrics),
            });
        }
    }

    out.push(PeriodRow {
        kind: PeriodKind::Total,
        label: TOTAL_LABEL.to_string(),
        values: combine(&daily, daily.keys(), metrics),
    });
    out
}

fn collapse_by_date(
    rows: &[AggregateRow],
    date_index: usize,
    metrics: &[&MetricSpec],
) -> BTreeMap<NaiveDate, Vec<f64>> {
    let mut grouped: BTreeMap<NaiveDate, Vec<&AggregateRow>> = BTreeMap::new();
    for row in rows {
        if let Ok(date) = NaiveDate::parse_from_str(row.key.get(date_index), "%Y-%m-%d") {
            grouped.entry(date).or_default().push(row);
        }
    }

    grouped
        .into_iter()
        .map(|(date, rows)| {
            let values = metrics
                .iter()
                .map(|m| m.rollup.combine(rows.iter().map(|r| r.metric(&m.name))))
                .collect();
            (date, values)
        })
        .collect()
}

fn combine<'a, I>(daily: &BTreeMap<NaiveDate, Vec<f64>>, dates: I, metrics: &[&MetricSpec]) -> Vec<f64>
where
    I: Iterator<Item = &'a NaiveDate> + Clone,
{
    metrics
        .iter()
        .enumerate()
        .map(|(i, m)| {
            m.rollup
                .combine(dates.clone().filter_map(|d| daily.get(d).map(|v| v[i])))
        })
        .collect()
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(31)
}
