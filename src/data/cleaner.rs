//! Data Cleaner Module
//! Coerces raw cells to their declared types, rejects invalid rows and collapses duplicates.

use super::loader::{RawRecord, RawTable};
use super::schema::{Casing, ColumnSpec, DefaultValue, FieldDef, Schema, SemanticType, DATETIME_FORMATS};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CleanerError {
    #[error("no valid rows in {path}: {rows} read, {rejected} rejected, {duplicates} duplicates")]
    NoValidData {
        path: PathBuf,
        rows: usize,
        rejected: usize,
        duplicates: usize,
    },
}

/// A typed cell of a cleaned record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CleanValue {
    Date(NaiveDate),
    Number(f64),
    Text(String),
}

impl CleanValue {
    /// Canonical text form, used for dimension keys and duplicate detection.
    /// Dates render as ISO `YYYY-MM-DD` so lexicographic order is chronological.
    pub fn key_text(&self) -> String {
        match self {
            CleanValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            CleanValue::Number(n) => n.to_string(),
            CleanValue::Text(t) => t.clone(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CleanValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CleanValue::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// A record that passed coercion; values are aligned with `CleanTable::fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRecord {
    pub source_row: usize,
    pub values: Vec<CleanValue>,
}

/// Cleaned records sharing one schema.
#[derive(Debug, Clone)]
pub struct CleanTable {
    pub fields: Vec<FieldDef>,
    pub records: Vec<CleanRecord>,
}

impl CleanTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Why a row was rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    Missing { column: String },
    Invalid { column: String, value: String },
    OutOfRange { column: String, value: f64 },
    Excluded { column: String, marker: String },
}

impl RejectReason {
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::Missing { .. } => "missing",
            RejectReason::Invalid { .. } => "invalid",
            RejectReason::OutOfRange { .. } => "out_of_range",
            RejectReason::Excluded { .. } => "excluded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rejection {
    pub row: usize,
    pub reason: RejectReason,
    pub record: RawRecord,
}

/// Cleaner result. `rejects + duplicates + clean == raw rows` always holds.
#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub table: CleanTable,
    pub rejects: Vec<Rejection>,
    pub duplicate_count: usize,
    /// Optional cells that were malformed and replaced by the column default.
    pub defaulted_values: usize,
    pub raw_count: usize,
}

impl CleanOutcome {
    pub fn rejected_count(&self) -> usize {
        self.rejects.len()
    }

    /// Rejection counts per reason kind.
    pub fn reject_breakdown(&self) -> BTreeMap<&'static str, usize> {
        let mut breakdown = BTreeMap::new();
        for rejection in &self.rejects {
            *breakdown.entry(rejection.reason.kind()).or_insert(0) += 1;
        }
        breakdown
    }
}

/// Applies the schema to raw records.
pub struct DataCleaner<'a> {
    schema: &'a Schema,
    fields: Vec<FieldDef>,
    identity: Vec<usize>,
}

impl<'a> DataCleaner<'a> {
    /// `identity_key` names the fields that identify a duplicate; an empty key
    /// compares whole records. Names are expected to be validated already.
    pub fn new(schema: &'a Schema, identity_key: &[String]) -> Self {
        let fields = schema.fields();
        let identity = if identity_key.is_empty() {
            (0..fields.len()).collect()
        } else {
            identity_key
                .iter()
                .filter_map(|name| fields.iter().position(|f| &f.name == name))
                .collect()
        };
        Self {
            schema,
            fields,
            identity,
        }
    }

    pub fn clean(&self, raw: RawTable) -> Result<CleanOutcome, CleanerError> {
        let raw_count = raw.len();
        let mut records = Vec::with_capacity(raw_count);
        let mut rejects = Vec::new();
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut duplicate_count = 0;
        let mut defaulted_values = 0;

        for record in raw.records {
            let (values, defaulted) = match self.clean_record(&record) {
                Ok(cleaned) => cleaned,
                Err(reason) => {
                    debug!(row = record.row, reason = ?reason, "rejected row");
                    rejects.push(Rejection {
                        row: record.row,
                        reason,
                        record,
                    });
                    continue;
                }
            };

            let identity: Vec<String> = self.identity.iter().map(|&i| values[i].key_text()).collect();
            if !seen.insert(identity) {
                duplicate_count += 1;
                continue;
            }

            defaulted_values += defaulted;
            records.push(CleanRecord {
                source_row: record.row,
                values,
            });
        }

        if !rejects.is_empty() {
            warn!(rejected = rejects.len(), "rows rejected during cleaning");
        }
        info!(
            rows = raw_count,
            clean = records.len(),
            rejected = rejects.len(),
            duplicates = duplicate_count,
            "cleaned raw export"
        );

        if records.is_empty() {
            return Err(CleanerError::NoValidData {
                path: raw.source.path,
                rows: raw_count,
                rejected: rejects.len(),
                duplicates: duplicate_count,
            });
        }

        Ok(CleanOutcome {
            table: CleanTable {
                fields: self.fields.clone(),
                records,
            },
            rejects,
            duplicate_count,
            defaulted_values,
            raw_count,
        })
    }

    /// Coerce one record; returns the typed values and how many optional cells fell back to defaults.
    fn clean_record(&self, record: &RawRecord) -> Result<(Vec<CleanValue>, usize), RejectReason> {
        let mut values = Vec::with_capacity(self.fields.len());
        let mut defaulted = 0;

        for column in &self.schema.columns {
            let (value, was_defaulted) = self.coerce(column, record.get(&column.name))?;
            if was_defaulted {
                defaulted += 1;
            }
            values.push(value);
        }

        for composite in &self.schema.composites {
            let parts: Vec<&str> = composite
                .sources
                .iter()
                .filter_map(|source| {
                    let idx = self.schema.columns.iter().position(|c| &c.name == source)?;
                    values[idx].as_text()
                })
                .filter(|part| !part.is_empty())
                .collect();
            let joined = parts.join(&composite.separator);
            values.push(CleanValue::Text(joined));
        }

        for rule in &self.schema.exclusions {
            let Some(idx) = self.fields.iter().position(|f| f.name == rule.column) else {
                continue;
            };
            if values[idx]
                .as_text()
                .is_some_and(|text| text.contains(&rule.contains))
            {
                return Err(RejectReason::Excluded {
                    column: rule.column.clone(),
                    marker: rule.contains.clone(),
                });
            }
        }

        Ok((values, defaulted))
    }

    fn coerce(&self, column: &ColumnSpec, raw: Option<&str>) -> Result<(CleanValue, bool), RejectReason> {
        let text = raw
            .map(str::trim)
            .filter(|t| !self.schema.is_missing_token(t));

        let Some(text) = text else {
            if column.required {
                return Err(RejectReason::Missing {
                    column: column.name.clone(),
                });
            }
            return Ok((Self::default_value(column), false));
        };

        let parsed = match column.semantic {
            SemanticType::Date => Self::parse_date(text, &column.date_formats()).map(CleanValue::Date),
            SemanticType::Numeric => self.parse_number(text).map(CleanValue::Number),
            SemanticType::Category => Some(CleanValue::Text(Self::normalize_category(text, column.casing))),
            SemanticType::Identifier => Some(CleanValue::Text(text.to_string())),
        };

        let Some(value) = parsed else {
            if column.required {
                return Err(RejectReason::Invalid {
                    column: column.name.clone(),
                    value: text.to_string(),
                });
            }
            return Ok((Self::default_value(column), true));
        };

        if let CleanValue::Number(n) = value {
            let below = column.min.is_some_and(|min| n < min);
            let above = column.max.is_some_and(|max| n > max);
            if below || above {
                return Err(RejectReason::OutOfRange {
                    column: column.name.clone(),
                    value: n,
                });
            }
        }

        Ok((value, false))
    }

    fn parse_date(text: &str, formats: &[&str]) -> Option<NaiveDate> {
        formats
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
            .or_else(|| {
                DATETIME_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                    .map(|dt| dt.date())
            })
    }

    fn parse_number(&self, text: &str) -> Option<f64> {
        let cleaned = if self.schema.thousands_separator.is_empty() {
            text.to_string()
        } else {
            text.replace(self.schema.thousands_separator.as_str(), "")
        };
        cleaned
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
    }

    fn normalize_category(text: &str, casing: Casing) -> String {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        match casing {
            Casing::Preserve => collapsed,
            Casing::Lower => collapsed.to_lowercase(),
            Casing::Upper => collapsed.to_uppercase(),
        }
    }

    fn default_value(column: &ColumnSpec) -> CleanValue {
        match (column.semantic, &column.default) {
            (SemanticType::Numeric, Some(DefaultValue::Number(n))) => CleanValue::Number(*n),
            (SemanticType::Numeric, _) => CleanValue::Number(0.0),
            (SemanticType::Category, Some(DefaultValue::Text(t))) => {
                CleanValue::Text(Self::normalize_category(t, column.casing))
            }
            (_, Some(DefaultValue::Text(t))) => CleanValue::Text(t.clone()),
            (_, Some(DefaultValue::Number(n))) => CleanValue::Text(n.to_string()),
            (_, None) => CleanValue::Text(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::SourceInfo;
    use crate::data::schema::{CompositeSpec, ExclusionRule};

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnSpec::new("date", SemanticType::Date),
            ColumnSpec::new("region", SemanticType::Category).with_casing(Casing::Lower),
            ColumnSpec::new("orders", SemanticType::Numeric).with_min(0.0),
            ColumnSpec::new("note", SemanticType::Identifier).optional(),
        ])
    }

    fn raw(rows: &[[Option<&str>; 4]]) -> RawTable {
        let names = ["date", "region", "orders", "note"];
        RawTable {
            source: SourceInfo {
                path: PathBuf::from("daily.csv"),
                bytes: 0,
                sha256: String::new(),
            },
            columns: names.iter().map(|s| s.to_string()).collect(),
            records: rows
                .iter()
                .enumerate()
                .map(|(i, row)| RawRecord {
                    row: i + 1,
                    values: names
                        .iter()
                        .zip(row.iter())
                        .map(|(n, v)| (n.to_string(), v.map(str::to_string)))
                        .collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn missing_required_numeric_is_rejected_not_fatal() {
        let table = raw(&[
            [Some("2024-03-01"), Some("North"), Some("3"), None],
            [Some("2024-03-01"), Some("South"), None, None],
            [Some("2024-03-02"), Some("North"), Some("1,250"), Some("x")],
        ]);
        let outcome = DataCleaner::new(&schema(), &[]).clean(table).unwrap();

        assert_eq!(outcome.table.len(), 2);
        assert_eq!(outcome.rejected_count(), 1);
        assert_eq!(outcome.rejects[0].row, 2);
        assert_eq!(
            outcome.rejects[0].reason,
            RejectReason::Missing {
                column: "orders".into()
            }
        );
        assert_eq!(outcome.table.records[1].values[2], CleanValue::Number(1250.0));
        assert_eq!(outcome.table.records[0].values[1], CleanValue::Text("north".into()));
    }

    #[test]
    fn invalid_and_out_of_range_values_are_rejected() {
        let table = raw(&[
            [Some("03/01/2024"), Some("North"), Some("3"), None],
            [Some("2024-03-01"), Some("North"), Some("-4"), None],
            [Some("2024-03-01"), Some("North"), Some("abc"), None],
            [Some("2024/03/02 08:30:00"), Some("North"), Some("2"), None],
        ]);
        let outcome = DataCleaner::new(&schema(), &[]).clean(table).unwrap();

        let kinds: Vec<_> = outcome.rejects.iter().map(|r| r.reason.kind()).collect();
        assert_eq!(kinds, vec!["invalid", "out_of_range", "invalid"]);
        assert_eq!(
            outcome.table.records[0].values[0],
            CleanValue::Date(NaiveDate::from_ymd_opt(2024, 3, 2).unwrap())
        );
    }

    #[test]
    fn duplicates_keep_first_occurrence_and_are_counted() {
        let table = raw(&[
            [Some("2024-03-01"), Some("North"), Some("3"), Some("a")],
            [Some("2024-03-01"), Some(" north "), Some("9"), Some("b")],
            [Some("2024-03-01"), Some("South"), Some("1"), Some("c")],
        ]);
        let key = vec!["date".to_string(), "region".to_string()];
        let outcome = DataCleaner::new(&schema(), &key).clean(table).unwrap();

        assert_eq!(outcome.duplicate_count, 1);
        assert_eq!(outcome.table.len(), 2);
        assert_eq!(outcome.table.records[0].values[2], CleanValue::Number(3.0));
    }

    #[test]
    fn accounting_covers_every_raw_row() {
        let table = raw(&[
            [Some("2024-03-01"), Some("North"), Some("3"), None],
            [Some("2024-03-01"), Some("North"), Some("3"), None],
            [None, Some("North"), Some("3"), None],
            [Some("2024-03-02"), Some("East"), Some("nan"), None],
            [Some("2024-03-02"), Some("East"), Some("5"), None],
        ]);
        let outcome = DataCleaner::new(&schema(), &[]).clean(table).unwrap();
        assert_eq!(
            outcome.rejected_count() + outcome.duplicate_count + outcome.table.len(),
            outcome.raw_count
        );
        assert_eq!(outcome.raw_count, 5);
    }

    #[test]
    fn all_rows_rejected_is_no_valid_data() {
        let table = raw(&[[None, Some("North"), Some("3"), None]]);
        let err = DataCleaner::new(&schema(), &[]).clean(table).unwrap_err();
        let CleanerError::NoValidData { rows, rejected, .. } = err;
        assert_eq!((rows, rejected), (1, 1));
    }

    #[test]
    fn composites_join_non_empty_parts_and_exclusions_reject() {
        let mut schema = Schema::new(vec![
            ColumnSpec::new("date", SemanticType::Date),
            ColumnSpec::new("supervisor", SemanticType::Category).optional(),
            ColumnSpec::new("bd", SemanticType::Category).optional(),
            ColumnSpec::new("orders", SemanticType::Numeric),
        ]);
        schema.composites.push(CompositeSpec {
            name: "dimension".into(),
            sources: vec!["supervisor".into(), "bd".into()],
            separator: " - ".into(),
        });
        schema.exclusions.push(ExclusionRule {
            column: "dimension".into(),
            contains: "(left)".into(),
        });

        let names = ["date", "supervisor", "bd", "orders"];
        let rows: [[Option<&str>; 4]; 3] = [
            [Some("2024-03-01"), Some("Alice"), Some("Bob"), Some("1")],
            [Some("2024-03-01"), None, Some("Carol"), Some("1")],
            [Some("2024-03-01"), Some("Alice"), Some("Dan (left)"), Some("1")],
        ];
        let table = RawTable {
            source: SourceInfo {
                path: PathBuf::from("daily.csv"),
                bytes: 0,
                sha256: String::new(),
            },
            columns: names.iter().map(|s| s.to_string()).collect(),
            records: rows
                .iter()
                .enumerate()
                .map(|(i, row)| RawRecord {
                    row: i + 1,
                    values: names
                        .iter()
                        .zip(row.iter())
                        .map(|(n, v)| (n.to_string(), v.map(str::to_string)))
                        .collect(),
                })
                .collect(),
        };

        let outcome = DataCleaner::new(&schema, &[]).clean(table).unwrap();
        let dims: Vec<_> = outcome
            .table
            .records
            .iter()
            .map(|r| r.values[4].key_text())
            .collect();
        assert_eq!(dims, vec!["Alice - Bob", "Carol"]);
        assert_eq!(outcome.reject_breakdown().get("excluded"), Some(&1));
    }
}
