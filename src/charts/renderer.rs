//! Section Renderer
//! Turns aggregate rows into formatted tables and SVG charts.
//!
//! Rendering is pure: the same rows and settings always give the same cells
//! and the same SVG text.

use super::format::{change_rate, NumberFormatter, Tone};
use super::plotter::{ChartPlotter, LineData};
use crate::config::{FormatSpec, SectionLayout};
use crate::stats::{compare_latest, period_rows, AggregateRow, AggregateTable, MetricSpec, PeriodKind};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("section '{section}' has no data")]
    EmptyData { section: String },
    #[error("section '{section}' refers to unknown {what} '{name}'")]
    Unknown {
        section: String,
        what: &'static str,
        name: String,
    },
    #[error("section '{section}': chart drawing failed: {reason}")]
    Chart { section: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Data,
    WeekTotal,
    MonthTotal,
    GrandTotal,
}

impl From<PeriodKind> for RowKind {
    fn from(kind: PeriodKind) -> Self {
        match kind {
            PeriodKind::Day => RowKind::Data,
            PeriodKind::Week => RowKind::WeekTotal,
            PeriodKind::Month => RowKind::MonthTotal,
            PeriodKind::Total => RowKind::GrandTotal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableCell {
    pub text: String,
    pub tone: Tone,
}

impl TableCell {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tone: Tone::Plain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub kind: RowKind,
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedTable {
    pub title: String,
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    Line,
}

/// Plotted data of one series: (x label, value).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub name: String,
    pub points: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedChart {
    pub title: String,
    pub kind: ChartKind,
    pub series: Vec<ChartSeries>,
    #[serde(skip)]
    pub svg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SectionBody {
    Table(RenderedTable),
    Chart(RenderedChart),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedSection {
    pub order: i32,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub body: SectionBody,
}

/// Everything needed to draw one chart.
#[derive(Debug, Clone)]
pub struct ChartSpec<'a> {
    pub kind: ChartKind,
    pub title: &'a str,
    /// Index of the x dimension in the row keys.
    pub x: usize,
    pub series: Option<usize>,
    pub metric: &'a MetricSpec,
    pub size: (u32, u32),
    pub rows: &'a [AggregateRow],
}

/// A section ready to render: its rows are already narrowed to one split value.
#[derive(Debug, Clone)]
pub struct SectionInput<'a> {
    pub order: i32,
    pub title: String,
    /// e.g. "Members: Bob, Dan"
    pub subtitle: Option<String>,
    pub layout: &'a SectionLayout,
    pub table: &'a AggregateTable,
    pub rows: Vec<AggregateRow>,
}

pub struct SectionRenderer {
    formatter: NumberFormatter,
    chart_size: (u32, u32),
}

impl SectionRenderer {
    pub fn new(spec: &FormatSpec) -> Self {
        Self {
            formatter: NumberFormatter::new(spec),
            chart_size: (spec.chart_width, spec.chart_height),
        }
    }

    pub fn render(&self, input: &SectionInput<'_>) -> Result<RenderedSection, RenderError> {
        if input.rows.is_empty() {
            return Err(RenderError::EmptyData {
                section: input.title.clone(),
            });
        }

        let body = match input.layout {
            SectionLayout::Bar { x, metric } | SectionLayout::Line { x, metric, .. } => {
                let series = match input.layout {
                    SectionLayout::Line {
                        series: Some(series),
                        ..
                    } => Some(self.dimension(input, series)?),
                    _ => None,
                };
                let kind = if matches!(input.layout, SectionLayout::Bar { .. }) {
                    ChartKind::Bar
                } else {
                    ChartKind::Line
                };
                let spec = ChartSpec {
                    kind,
                    title: &input.title,
                    x: self.dimension(input, x)?,
                    series,
                    metric: self.metric(input, metric)?,
                    size: self.chart_size,
                    rows: &input.rows,
                };
                SectionBody::Chart(self.render_chart(&spec)?)
            }
            _ => SectionBody::Table(self.render_table(input)?),
        };

        Ok(RenderedSection {
            order: input.order,
            title: input.title.clone(),
            subtitle: input.subtitle.clone(),
            body,
        })
    }

    /// Table for a plain, period-totals or comparison layout.
    pub fn render_table(&self, input: &SectionInput<'_>) -> Result<RenderedTable, RenderError> {
        match input.layout {
            SectionLayout::Table {
                metrics,
                period_totals: Some(date),
                ..
            } => {
                let metrics = self.metrics(input, metrics)?;
                let date_idx = self.dimension(input, date)?;
                let rows = period_rows(&input.rows, date_idx, &metrics)
                    .into_iter()
                    .map(|p| TableRow {
                        kind: p.kind.into(),
                        cells: std::iter::once(TableCell::plain(p.label))
                            .chain(metrics.iter().zip(&p.values).map(|(m, v)| self.value_cell(m, *v)))
                            .collect(),
                    })
                    .collect();
                Ok(RenderedTable {
                    title: input.title.clone(),
                    columns: std::iter::once(date.clone())
                        .chain(metrics.iter().map(|m| m.label().to_string()))
                        .collect(),
                    rows,
                })
            }
            SectionLayout::Table {
                metrics, sort_by, ..
            } => {
                let metrics = self.metrics(input, metrics)?;
                let mut source: Vec<&AggregateRow> = input.rows.iter().collect();
                if let Some(sort) = sort_by {
                    let sort = self.metric(input, sort)?;
                    source.sort_by(|a, b| descending(a.metric(&sort.name), b.metric(&sort.name)));
                }
                let rows = source
                    .into_iter()
                    .map(|row| TableRow {
                        kind: RowKind::Data,
                        cells: row
                            .key
                            .0
                            .iter()
                            .map(|k| TableCell::plain(k.as_str()))
                            .chain(metrics.iter().map(|m| self.value_cell(m, row.metric(&m.name))))
                            .collect(),
                    })
                    .collect();
                Ok(RenderedTable {
                    title: input.title.clone(),
                    columns: input
                        .table
                        .dimensions
                        .iter()
                        .cloned()
                        .chain(metrics.iter().map(|m| m.label().to_string()))
                        .collect(),
                    rows,
                })
            }
            SectionLayout::Comparison {
                group,
                date,
                metrics,
                sort_by,
                lookback_days,
            } => {
                let metrics = self.metrics(input, metrics)?;
                let sort_idx = match sort_by {
                    Some(name) => metrics.iter().position(|m| &m.name == name).unwrap_or(0),
                    None => 0,
                };
                let sort_metric = sort_by.as_ref().map(|name| self.metric(input, name)).transpose()?;
                // A sort metric outside the displayed ones is compared too, then dropped.
                let mut compared = metrics.clone();
                let sort_idx = match sort_metric {
                    Some(m) if !metrics.iter().any(|x| x.name == m.name) => {
                        compared.push(m);
                        compared.len() - 1
                    }
                    _ => sort_idx,
                };

                let group_idx = self.dimension(input, group)?;
                let date_idx = self.dimension(input, date)?;
                let rows = compare_latest(&input.rows, group_idx, date_idx, &compared, *lookback_days, sort_idx)
                    .into_iter()
                    .map(|cmp| TableRow {
                        kind: RowKind::Data,
                        cells: [
                            TableCell::plain(cmp.group.as_str()),
                            TableCell::plain(cmp.date.format("%Y-%m-%d").to_string()),
                        ]
                        .into_iter()
                        .chain(metrics.iter().enumerate().map(|(i, m)| {
                            let current = cmp.current[i];
                            let previous = cmp.previous.as_ref().map(|p| p[i]);
                            let (change, tone) = change_rate(current, previous);
                            TableCell {
                                text: format!("{} ({})", self.formatter.format(current, m.decimals), change),
                                tone,
                            }
                        }))
                        .collect(),
                    })
                    .collect();

                Ok(RenderedTable {
                    title: input.title.clone(),
                    columns: [group.clone(), date.clone()]
                        .into_iter()
                        .chain(metrics.iter().map(|m| m.label().to_string()))
                        .collect(),
                    rows,
                })
            }
            SectionLayout::Bar { .. } | SectionLayout::Line { .. } => Err(RenderError::Unknown {
                section: input.title.clone(),
                what: "table layout",
                name: "chart".to_string(),
            }),
        }
    }

    /// Collapses rows by x (and series) with the metric rollup, then draws.
    pub fn render_chart(&self, spec: &ChartSpec<'_>) -> Result<RenderedChart, RenderError> {
        if spec.rows.is_empty() {
            return Err(RenderError::EmptyData {
                section: spec.title.to_string(),
            });
        }

        let mut buckets: BTreeMap<&str, BTreeMap<&str, Vec<f64>>> = BTreeMap::new();
        let mut xs: BTreeSet<&str> = BTreeSet::new();
        for row in spec.rows {
            let series = spec.series.map(|i| row.key.get(i)).unwrap_or(spec.metric.label());
            let x = row.key.get(spec.x);
            xs.insert(x);
            buckets
                .entry(series)
                .or_default()
                .entry(x)
                .or_default()
                .push(row.metric(&spec.metric.name));
        }
        let x_labels: Vec<String> = xs.iter().map(|x| x.to_string()).collect();

        let series: Vec<ChartSeries> = buckets
            .into_iter()
            .map(|(name, points)| ChartSeries {
                name: name.to_string(),
                points: points
                    .into_iter()
                    .map(|(x, values)| (x.to_string(), spec.metric.rollup.combine(values)))
                    .collect(),
            })
            .collect();

        let fmt_y = |v: f64| self.formatter.format(v, Some(0));
        let drawn = match spec.kind {
            ChartKind::Bar => {
                let values: Vec<f64> = series
                    .first()
                    .map(|s| s.points.iter().map(|(_, v)| *v).collect())
                    .unwrap_or_default();
                ChartPlotter::bar_svg(spec.title, spec.metric.label(), &x_labels, &values, spec.size, &fmt_y)
            }
            ChartKind::Line => {
                let lines: Vec<LineData<'_>> = series
                    .iter()
                    .map(|s| {
                        let by_x: BTreeMap<&str, f64> =
                            s.points.iter().map(|(x, v)| (x.as_str(), *v)).collect();
                        LineData {
                            name: &s.name,
                            values: x_labels
                                .iter()
                                .map(|x| by_x.get(x.as_str()).copied().unwrap_or(f64::NAN))
                                .collect(),
                        }
                    })
                    .collect();
                ChartPlotter::line_svg(spec.title, spec.metric.label(), &x_labels, &lines, spec.size, &fmt_y)
            }
        };
        let svg = drawn.map_err(|reason| RenderError::Chart {
            section: spec.title.to_string(),
            reason,
        })?;

        Ok(RenderedChart {
            title: spec.title.to_string(),
            kind: spec.kind,
            series,
            svg,
        })
    }

    fn value_cell(&self, metric: &MetricSpec, value: f64) -> TableCell {
        TableCell::plain(self.formatter.format(value, metric.decimals))
    }

    fn dimension(&self, input: &SectionInput<'_>, name: &str) -> Result<usize, RenderError> {
        input.table.dimension_index(name).ok_or_else(|| RenderError::Unknown {
            section: input.title.clone(),
            what: "dimension",
            name: name.to_string(),
        })
    }

    fn metric<'t>(&self, input: &SectionInput<'t>, name: &str) -> Result<&'t MetricSpec, RenderError> {
        input.table.metric_spec(name).ok_or_else(|| RenderError::Unknown {
            section: input.title.clone(),
            what: "metric",
            name: name.to_string(),
        })
    }

    fn metrics<'t>(&self, input: &SectionInput<'t>, names: &[String]) -> Result<Vec<&'t MetricSpec>, RenderError> {
        names.iter().map(|n| self.metric(input, n)).collect()
    }
}

fn descending(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}
