//! Input Schema Module
//! Declared column types for the raw export, checked once at the load/clean boundary.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Date formats tried when a date column declares none.
pub const DEFAULT_DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

/// Datetime formats tried after the date formats; only the date part is kept.
pub const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"];

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Date,
    Numeric,
    Category,
    Identifier,
}

impl SemanticType {
    /// Whether the type can be used as an aggregation dimension.
    pub fn is_dimension(self) -> bool {
        !matches!(self, SemanticType::Numeric)
    }

    pub fn is_text(self) -> bool {
        matches!(self, SemanticType::Category | SemanticType::Identifier)
    }
}

/// Casing applied to category values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Casing {
    #[default]
    Preserve,
    Lower,
    Upper,
}

/// Fallback value for an optional column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Number(f64),
    Text(String),
}

/// One declared input column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic: SemanticType,
    #[serde(default = "default_required")]
    pub required: bool,
    /// chrono format strings, date columns only
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub casing: Casing,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub default: Option<DefaultValue>,
}

fn default_required() -> bool {
    true
}

impl ColumnSpec {
    pub fn new(name: &str, semantic: SemanticType) -> Self {
        Self {
            name: name.to_string(),
            semantic,
            required: true,
            formats: Vec::new(),
            casing: Casing::Preserve,
            min: None,
            max: None,
            default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_casing(mut self, casing: Casing) -> Self {
        self.casing = casing;
        self
    }

    /// Date formats to try, in order.
    pub fn date_formats(&self) -> Vec<&str> {
        if self.formats.is_empty() {
            DEFAULT_DATE_FORMATS.to_vec()
        } else {
            self.formats.iter().map(String::as_str).collect()
        }
    }
}

/// A dimension built by joining several text columns, e.g. "Supervisor - BD".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompositeSpec {
    pub name: String,
    pub sources: Vec<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    " - ".to_string()
}

/// Rows whose text field contains `contains` are rejected as excluded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExclusionRule {
    pub column: String,
    pub contains: String,
}

/// Field of a cleaned record: a declared column or a composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub semantic: SemanticType,
}

/// Column contract between the caller and the loader/cleaner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Schema {
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub composites: Vec<CompositeSpec>,
    #[serde(default)]
    pub exclusions: Vec<ExclusionRule>,
    /// Cell contents treated as empty.
    #[serde(default = "default_missing_tokens")]
    pub missing_tokens: Vec<String>,
    /// Stripped from numeric cells before parsing; empty disables.
    #[serde(default = "default_thousands_separator")]
    pub thousands_separator: String,
}

fn default_missing_tokens() -> Vec<String> {
    ["nan", "NaN", "null", "NULL", "N/A"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_thousands_separator() -> String {
    ",".to_string()
}

impl Schema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self {
            columns,
            composites: Vec::new(),
            exclusions: Vec::new(),
            missing_tokens: default_missing_tokens(),
            thousands_separator: default_thousands_separator(),
        }
    }

    /// Cleaned record layout: declared columns first, then composites.
    pub fn fields(&self) -> Vec<FieldDef> {
        self.columns
            .iter()
            .map(|c| FieldDef {
                name: c.name.clone(),
                semantic: c.semantic,
            })
            .chain(self.composites.iter().map(|c| FieldDef {
                name: c.name.clone(),
                semantic: SemanticType::Category,
            }))
            .collect()
    }

    /// Semantic type of a field, composites included.
    pub fn field_type(&self, name: &str) -> Option<SemanticType> {
        self.fields()
            .into_iter()
            .find(|f| f.name == name)
            .map(|f| f.semantic)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_missing_token(&self, value: &str) -> bool {
        value.is_empty() || self.missing_tokens.iter().any(|t| t == value)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.columns.is_empty() {
            return Err(ConfigError::invalid("schema declares no columns"));
        }

        let mut seen = HashSet::new();
        for field in self.fields() {
            if field.name.trim().is_empty() {
                return Err(ConfigError::invalid("schema field with an empty name"));
            }
            if !seen.insert(field.name.clone()) {
                return Err(ConfigError::invalid(format!(
                    "schema field '{}' declared twice",
                    field.name
                )));
            }
        }

        for column in &self.columns {
            match column.semantic {
                SemanticType::Date if !column.required => {
                    return Err(ConfigError::invalid(format!(
                        "date column '{}' must be required",
                        column.name
                    )));
                }
                SemanticType::Numeric => {
                    if let (Some(min), Some(max)) = (column.min, column.max) {
                        if min > max {
                            return Err(ConfigError::invalid(format!(
                                "column '{}': min {} exceeds max {}",
                                column.name, min, max
                            )));
                        }
                    }
                    if let Some(DefaultValue::Text(text)) = &column.default {
                        return Err(ConfigError::invalid(format!(
                            "numeric column '{}' has text default '{}'",
                            column.name, text
                        )));
                    }
                }
                _ => {}
            }
            if !column.formats.is_empty() && column.semantic != SemanticType::Date {
                return Err(ConfigError::invalid(format!(
                    "column '{}': date formats on a non-date column",
                    column.name
                )));
            }
        }

        for composite in &self.composites {
            if composite.sources.is_empty() {
                return Err(ConfigError::invalid(format!(
                    "composite '{}' has no sources",
                    composite.name
                )));
            }
            for source in &composite.sources {
                match self.column(source) {
                    Some(c) if c.semantic.is_text() => {}
                    Some(_) => {
                        return Err(ConfigError::invalid(format!(
                            "composite '{}': source '{}' is not a text column",
                            composite.name, source
                        )))
                    }
                    None => {
                        return Err(ConfigError::invalid(format!(
                            "composite '{}': unknown source '{}'",
                            composite.name, source
                        )))
                    }
                }
            }
        }

        for rule in &self.exclusions {
            match self.field_type(&rule.column) {
                Some(t) if t.is_text() => {}
                _ => {
                    return Err(ConfigError::invalid(format!(
                        "exclusion on '{}': not a text field",
                        rule.column
                    )))
                }
            }
            if rule.contains.is_empty() {
                return Err(ConfigError::invalid(format!(
                    "exclusion on '{}' has an empty marker",
                    rule.column
                )));
            }
        }

        Ok(())
    }
}
