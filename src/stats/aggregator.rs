//! Aggregator Module
//! Groups cleaned records by dimension keys and computes metrics with Polars.

use crate::data::{CleanRecord, CleanTable, SemanticType};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

const MEMBERS_ALIAS: &str = "__members";

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("aggregation '{aggregation}': unknown field '{field}'")]
    UnknownField { aggregation: String, field: String },
    #[error("aggregation '{aggregation}': field '{field}' is not numeric")]
    NotNumeric { aggregation: String, field: String },
    #[error("aggregation '{aggregation}': field '{field}' cannot be a dimension")]
    NotDimension { aggregation: String, field: String },
}

/// How several values of one metric combine into one (collapsed rows, period totals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rollup {
    #[default]
    Sum,
    Max,
    Min,
    Mean,
}

impl Rollup {
    /// Combine values, ignoring NaN. Nothing left to combine yields NaN.
    pub fn combine<I: IntoIterator<Item = f64>>(self, values: I) -> f64 {
        let finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return f64::NAN;
        }
        match self {
            Rollup::Sum => finite.iter().sum(),
            Rollup::Max => finite.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Rollup::Min => finite.iter().copied().fold(f64::INFINITY, f64::min),
            Rollup::Mean => finite.iter().sum::<f64>() / finite.len() as f64,
        }
    }
}

/// Metric formula over the records of one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricFormula {
    Count,
    Sum { field: String },
    Mean { field: String },
    Min { field: String },
    Max { field: String },
    Median { field: String },
    DistinctCount { field: String },
    /// Sum of several numeric fields, e.g. spot + futures volume.
    SumOf { fields: Vec<String> },
    /// sum(numerator) / sum(denominator); a zero denominator yields NaN.
    Ratio { numerator: String, denominator: String },
}

impl MetricFormula {
    /// Fields that must be numeric.
    pub fn numeric_fields(&self) -> Vec<&str> {
        match self {
            MetricFormula::Count | MetricFormula::DistinctCount { .. } => Vec::new(),
            MetricFormula::Sum { field }
            | MetricFormula::Mean { field }
            | MetricFormula::Min { field }
            | MetricFormula::Max { field }
            | MetricFormula::Median { field } => vec![field.as_str()],
            MetricFormula::SumOf { fields } => fields.iter().map(String::as_str).collect(),
            MetricFormula::Ratio {
                numerator,
                denominator,
            } => vec![numerator.as_str(), denominator.as_str()],
        }
    }

    /// Every field the formula reads.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            MetricFormula::DistinctCount { field } => vec![field.as_str()],
            other => other.numeric_fields(),
        }
    }
}

/// A named metric with its display and rollup settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricSpec {
    pub name: String,
    /// Column header; defaults to the name.
    #[serde(default)]
    pub label: Option<String>,
    pub formula: MetricFormula,
    #[serde(default)]
    pub rollup: Rollup,
    /// Overrides the global decimal places.
    #[serde(default)]
    pub decimals: Option<usize>,
}

impl MetricSpec {
    pub fn new(name: &str, formula: MetricFormula) -> Self {
        Self {
            name: name.to_string(),
            label: None,
            formula,
            rollup: Rollup::Sum,
            decimals: None,
        }
    }

    pub fn with_rollup(mut self, rollup: Rollup) -> Self {
        self.rollup = rollup;
        self
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// Grouping keys plus the metrics computed per bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregationSpec {
    pub name: String,
    pub group_by: Vec<String>,
    pub metrics: Vec<MetricSpec>,
    /// Only records where these text fields are non-empty take part.
    #[serde(default)]
    pub require_present: Vec<String>,
}

/// Ordered tuple of dimension values identifying one bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AggregationKey(pub Vec<String>);

impl AggregationKey {
    pub fn get(&self, index: usize) -> &str {
        self.0.get(index).map(String::as_str).unwrap_or_default()
    }
}

/// One bucket: its key, how many records it holds, and its metric values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub key: AggregationKey,
    pub members: usize,
    pub metrics: BTreeMap<String, f64>,
}

impl AggregateRow {
    /// Metric value, NaN when the metric is unknown.
    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(f64::NAN)
    }
}

/// Aggregation output, rows sorted by key.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateTable {
    pub name: String,
    pub dimensions: Vec<String>,
    pub metrics: Vec<MetricSpec>,
    pub rows: Vec<AggregateRow>,
}

impl AggregateTable {
    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d == name)
    }

    pub fn metric_spec(&self, name: &str) -> Option<&MetricSpec> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Distinct values of one dimension, ascending.
    pub fn distinct_values(&self, index: usize) -> Vec<String> {
        let mut values: Vec<String> = self
            .rows
            .iter()
            .map(|r| r.key.get(index).to_string())
            .collect();
        values.sort();
        values.dedup();
        values
    }
}

/// Computes aggregate tables from cleaned records.
pub struct Aggregator;

impl Aggregator {
    pub fn aggregate(
        table: &CleanTable,
        spec: &AggregationSpec,
    ) -> Result<AggregateTable, AggregateError> {
        let key_fields = spec
            .group_by
            .iter()
            .map(|name| Self::resolve_dimension(table, spec, name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut needed: Vec<usize> = key_fields.clone();
        for metric in &spec.metrics {
            for field in metric.formula.fields() {
                let idx = Self::resolve(table, spec, field)?;
                if !needed.contains(&idx) {
                    needed.push(idx);
                }
            }
            for field in metric.formula.numeric_fields() {
                let idx = Self::resolve(table, spec, field)?;
                if table.fields[idx].semantic != SemanticType::Numeric {
                    return Err(AggregateError::NotNumeric {
                        aggregation: spec.name.clone(),
                        field: field.to_string(),
                    });
                }
            }
        }

        let mut required = Vec::with_capacity(spec.require_present.len());
        for field in &spec.require_present {
            required.push(Self::resolve(table, spec, field)?);
        }
        let records: Vec<&CleanRecord> = table
            .records
            .iter()
            .filter(|r| {
                required
                    .iter()
                    .all(|&idx| r.values[idx].as_text().map_or(true, |t| !t.is_empty()))
            })
            .collect();
        if records.is_empty() {
            info!(aggregation = %spec.name, "no records to aggregate");
            return Ok(AggregateTable {
                name: spec.name.clone(),
                dimensions: spec.group_by.clone(),
                metrics: spec.metrics.clone(),
                rows: Vec::new(),
            });
        }

        let df = Self::build_frame(table, &records, &needed)?;

        let keys: Vec<Expr> = key_fields
            .iter()
            .map(|&idx| col(Self::alias(idx).as_str()))
            .collect();
        let mut aggs: Vec<Expr> = vec![len().cast(DataType::Float64).alias(MEMBERS_ALIAS)];
        for (i, metric) in spec.metrics.iter().enumerate() {
            let expr = Self::metric_expr(table, &metric.formula);
            aggs.push(expr.cast(DataType::Float64).alias(format!("m{}", i)));
        }

        let out = df.lazy().group_by(keys).agg(aggs).collect()?;

        let mut key_columns: Vec<Vec<String>> = Vec::with_capacity(key_fields.len());
        for &idx in &key_fields {
            let values = out
                .column(&Self::alias(idx))?
                .str()?
                .into_iter()
                .map(|v| v.unwrap_or_default().to_string())
                .collect();
            key_columns.push(values);
        }
        let members = Self::float_column(&out, MEMBERS_ALIAS)?;
        let mut metric_columns: Vec<Vec<f64>> = Vec::with_capacity(spec.metrics.len());
        for i in 0..spec.metrics.len() {
            metric_columns.push(Self::float_column(&out, &format!("m{}", i))?);
        }

        let mut rows: Vec<AggregateRow> = (0..out.height())
            .map(|row| AggregateRow {
                key: AggregationKey(key_columns.iter().map(|c| c[row].clone()).collect()),
                members: members[row] as usize,
                metrics: spec
                    .metrics
                    .iter()
                    .zip(metric_columns.iter())
                    .map(|(m, values)| (m.name.clone(), values[row]))
                    .collect(),
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));

        debug_assert_eq!(rows.iter().map(|r| r.members).sum::<usize>(), records.len());
        info!(
            aggregation = %spec.name,
            buckets = rows.len(),
            records = records.len(),
            "aggregated"
        );

        Ok(AggregateTable {
            name: spec.name.clone(),
            dimensions: spec.group_by.clone(),
            metrics: spec.metrics.clone(),
            rows,
        })
    }

    fn resolve(table: &CleanTable, spec: &AggregationSpec, name: &str) -> Result<usize, AggregateError> {
        table
            .field_index(name)
            .ok_or_else(|| AggregateError::UnknownField {
                aggregation: spec.name.clone(),
                field: name.to_string(),
            })
    }

    fn resolve_dimension(
        table: &CleanTable,
        spec: &AggregationSpec,
        name: &str,
    ) -> Result<usize, AggregateError> {
        let idx = Self::resolve(table, spec, name)?;
        if !table.fields[idx].semantic.is_dimension() {
            return Err(AggregateError::NotDimension {
                aggregation: spec.name.clone(),
                field: name.to_string(),
            });
        }
        Ok(idx)
    }

    /// Frame columns are named by field position so field names never clash with aliases.
    fn alias(idx: usize) -> String {
        format!("f{}", idx)
    }

    fn build_frame(
        table: &CleanTable,
        records: &[&CleanRecord],
        fields: &[usize],
    ) -> Result<DataFrame, AggregateError> {
        let columns: Vec<Column> = fields
            .iter()
            .map(|&idx| {
                let name = Self::alias(idx);
                match table.fields[idx].semantic {
                    SemanticType::Numeric => Column::new(
                        name.into(),
                        records
                            .iter()
                            .map(|r| r.values[idx].as_number().unwrap_or(f64::NAN))
                            .collect::<Vec<f64>>(),
                    ),
                    _ => Column::new(
                        name.into(),
                        records
                            .iter()
                            .map(|r| r.values[idx].key_text())
                            .collect::<Vec<String>>(),
                    ),
                }
            })
            .collect();

        Ok(DataFrame::new(columns)?)
    }

    fn metric_expr(table: &CleanTable, formula: &MetricFormula) -> Expr {
        // Fields were resolved before the frame was built.
        let field = |name: &str| {
            let idx = table.field_index(name).unwrap_or_default();
            col(Self::alias(idx).as_str())
        };
        match formula {
            MetricFormula::Count => len(),
            MetricFormula::Sum { field: f } => field(f).sum(),
            MetricFormula::Mean { field: f } => field(f).mean(),
            MetricFormula::Min { field: f } => field(f).min(),
            MetricFormula::Max { field: f } => field(f).max(),
            MetricFormula::Median { field: f } => field(f).median(),
            MetricFormula::DistinctCount { field: f } => field(f).n_unique(),
            MetricFormula::SumOf { fields } => fields
                .iter()
                .map(|f| field(f).sum())
                .reduce(|acc, e| acc + e)
                .unwrap_or_else(|| lit(0.0)),
            MetricFormula::Ratio {
                numerator,
                denominator,
            } => field(numerator).sum() / field(denominator).sum(),
        }
    }

    /// Float column with non-finite values (x/0, 0/0) normalized to NaN.
    fn float_column(df: &DataFrame, name: &str) -> Result<Vec<f64>, AggregateError> {
        Ok(df
            .column(name)?
            .f64()?
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()).unwrap_or(f64::NAN))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CleanValue, FieldDef};

    fn table(rows: &[(&str, &str, f64, f64)]) -> CleanTable {
        CleanTable {
            fields: vec![
                FieldDef {
                    name: "date".into(),
                    semantic: SemanticType::Category,
                },
                FieldDef {
                    name: "region".into(),
                    semantic: SemanticType::Category,
                },
                FieldDef {
                    name: "revenue".into(),
                    semantic: SemanticType::Numeric,
                },
                FieldDef {
                    name: "orders".into(),
                    semantic: SemanticType::Numeric,
                },
            ],
            records: rows
                .iter()
                .enumerate()
                .map(|(i, (date, region, revenue, orders))| CleanRecord {
                    source_row: i + 1,
                    values: vec![
                        CleanValue::Text(date.to_string()),
                        CleanValue::Text(region.to_string()),
                        CleanValue::Number(*revenue),
                        CleanValue::Number(*orders),
                    ],
                })
                .collect(),
        }
    }

    fn spec(group_by: &[&str]) -> AggregationSpec {
        AggregationSpec {
            name: "by_region".into(),
            group_by: group_by.iter().map(|s| s.to_string()).collect(),
            metrics: vec![
                MetricSpec::new("rows", MetricFormula::Count),
                MetricSpec::new(
                    "revenue",
                    MetricFormula::Sum {
                        field: "revenue".into(),
                    },
                ),
                MetricSpec::new(
                    "avg_revenue",
                    MetricFormula::Mean {
                        field: "revenue".into(),
                    },
                ),
                MetricSpec::new(
                    "per_order",
                    MetricFormula::Ratio {
                        numerator: "revenue".into(),
                        denominator: "orders".into(),
                    },
                ),
                MetricSpec::new(
                    "active_days",
                    MetricFormula::DistinctCount {
                        field: "date".into(),
                    },
                ),
            ],
            require_present: Vec::new(),
        }
    }

    #[test]
    fn sums_and_counts_match_bucket_members() {
        let t = table(&[
            ("2024-03-01", "north", 10.0, 2.0),
            ("2024-03-01", "south", 5.0, 1.0),
            ("2024-03-02", "north", 30.0, 3.0),
        ]);
        let out = Aggregator::aggregate(&t, &spec(&["region"])).unwrap();

        assert_eq!(out.rows.len(), 2);
        let north = &out.rows[0];
        assert_eq!(north.key, AggregationKey(vec!["north".into()]));
        assert_eq!(north.members, 2);
        assert_eq!(north.metric("rows"), 2.0);
        assert_eq!(north.metric("revenue"), 40.0);
        assert_eq!(north.metric("avg_revenue"), 20.0);
        assert_eq!(north.metric("per_order"), 8.0);
        assert_eq!(north.metric("active_days"), 2.0);
        assert_eq!(out.rows[1].metric("revenue"), 5.0);
    }

    #[test]
    fn rows_are_sorted_by_key_regardless_of_input_order() {
        let forward = table(&[
            ("2024-03-01", "north", 1.0, 1.0),
            ("2024-03-02", "east", 1.0, 1.0),
            ("2024-03-01", "east", 1.0, 1.0),
        ]);
        let mut reversed = forward.clone();
        reversed.records.reverse();

        let a = Aggregator::aggregate(&forward, &spec(&["region", "date"])).unwrap();
        let b = Aggregator::aggregate(&reversed, &spec(&["region", "date"])).unwrap();

        let keys: Vec<_> = a.rows.iter().map(|r| r.key.0.join("|")).collect();
        assert_eq!(
            keys,
            vec!["east|2024-03-01", "east|2024-03-02", "north|2024-03-01"]
        );
        assert_eq!(a.rows, b.rows);
    }

    #[test]
    fn zero_denominator_ratio_is_nan_not_an_error() {
        let t = table(&[("2024-03-01", "north", 10.0, 0.0)]);
        let out = Aggregator::aggregate(&t, &spec(&["region"])).unwrap();
        assert!(out.rows[0].metric("per_order").is_nan());
        assert_eq!(out.rows[0].metric("revenue"), 10.0);
    }

    #[test]
    fn every_record_lands_in_exactly_one_bucket() {
        let t = table(&[
            ("2024-03-01", "north", 1.0, 1.0),
            ("2024-03-01", "north", 1.0, 1.0),
            ("2024-03-02", "south", 1.0, 1.0),
            ("2024-03-03", "west", 1.0, 1.0),
        ]);
        let out = Aggregator::aggregate(&t, &spec(&["region"])).unwrap();
        assert_eq!(out.rows.iter().map(|r| r.members).sum::<usize>(), 4);
        assert_eq!(out.distinct_values(0), vec!["north", "south", "west"]);
    }

    #[test]
    fn numeric_dimension_is_refused() {
        let t = table(&[("2024-03-01", "north", 1.0, 1.0)]);
        let err = Aggregator::aggregate(&t, &spec(&["revenue"])).unwrap_err();
        assert!(matches!(err, AggregateError::NotDimension { .. }));
    }

    #[test]
    fn sum_of_adds_several_fields() {
        let t = table(&[
            ("2024-03-01", "north", 10.0, 2.0),
            ("2024-03-02", "north", 1.0, 3.0),
        ]);
        let mut s = spec(&["region"]);
        s.metrics = vec![MetricSpec::new(
            "total",
            MetricFormula::SumOf {
                fields: vec!["revenue".into(), "orders".into()],
            },
        )];
        let out = Aggregator::aggregate(&t, &s).unwrap();
        assert_eq!(out.rows[0].metric("total"), 16.0);
    }

    #[test]
    fn require_present_skips_blank_records() {
        let t = table(&[
            ("2024-03-01", "north", 1.0, 1.0),
            ("2024-03-01", "", 2.0, 1.0),
        ]);
        let mut s = spec(&["date"]);
        s.require_present = vec!["region".into()];
        let out = Aggregator::aggregate(&t, &s).unwrap();
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].metric("revenue"), 1.0);

        let blank = table(&[("2024-03-01", "", 2.0, 1.0)]);
        assert!(Aggregator::aggregate(&blank, &s).unwrap().rows.is_empty());
    }

    #[test]
    fn rollup_ignores_nan() {
        assert_eq!(Rollup::Sum.combine([1.0, f64::NAN, 2.0]), 3.0);
        assert_eq!(Rollup::Max.combine([1.0, 7.0, 2.0]), 7.0);
        assert_eq!(Rollup::Mean.combine([2.0, 4.0]), 3.0);
        assert!(Rollup::Min.combine([f64::NAN]).is_nan());
    }
}
