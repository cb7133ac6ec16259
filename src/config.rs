//! Configuration Module
//! JSON run configuration, validated once before any stage runs.

use crate::data::{Schema, SemanticType};
use crate::error::ConfigError;
use crate::stats::AggregationSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Serialized form of the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// One self-contained HTML document.
    Html,
    /// ZIP with report.html, SVG charts and manifest.json.
    Bundle,
}

impl OutputFormat {
    /// `.zip` outputs are bundles, everything else is HTML.
    pub fn infer(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("zip") => OutputFormat::Bundle,
            _ => OutputFormat::Html,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberStyle {
    /// Always the configured number of decimals.
    #[default]
    Fixed,
    /// 0 as "0", integers and |v| >= 10 without decimals, else one decimal.
    Adaptive,
}

/// Number formatting and chart size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatSpec {
    pub style: NumberStyle,
    pub decimals: usize,
    pub thousands_separator: String,
    pub decimal_separator: String,
    pub nan_text: String,
    pub chart_width: u32,
    pub chart_height: u32,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            style: NumberStyle::Fixed,
            decimals: 2,
            thousands_separator: ",".to_string(),
            decimal_separator: ".".to_string(),
            nan_text: "-".to_string(),
            chart_width: 900,
            chart_height: 420,
        }
    }
}

/// What a section shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionLayout {
    /// Dimension columns plus metric columns, one row per aggregate row.
    /// With `period_totals` (a date dimension) rows become day/week/month/TOTAL.
    Table {
        metrics: Vec<String>,
        /// Sort rows by this metric, descending, instead of by key.
        #[serde(default)]
        sort_by: Option<String>,
        #[serde(default)]
        period_totals: Option<String>,
    },
    Bar {
        x: String,
        metric: String,
    },
    Line {
        x: String,
        metric: String,
        /// One line per value of this dimension.
        #[serde(default)]
        series: Option<String>,
    },
    /// Latest vs previous date per group, with change rates.
    Comparison {
        group: String,
        date: String,
        metrics: Vec<String>,
        #[serde(default)]
        sort_by: Option<String>,
        #[serde(default = "default_lookback")]
        lookback_days: u32,
    },
}

fn default_lookback() -> u32 {
    1
}

impl SectionLayout {
    /// Metrics the section reads.
    pub fn metrics(&self) -> Vec<&str> {
        match self {
            SectionLayout::Table {
                metrics, sort_by, ..
            }
            | SectionLayout::Comparison {
                metrics, sort_by, ..
            } => metrics
                .iter()
                .map(String::as_str)
                .chain(sort_by.as_deref())
                .collect(),
            SectionLayout::Bar { metric, .. } | SectionLayout::Line { metric, .. } => {
                vec![metric.as_str()]
            }
        }
    }

    /// Dimensions the section reads.
    pub fn dimensions(&self) -> Vec<&str> {
        match self {
            SectionLayout::Table { period_totals, .. } => {
                period_totals.as_deref().into_iter().collect()
            }
            SectionLayout::Bar { x, .. } => vec![x.as_str()],
            SectionLayout::Line { x, series, .. } => {
                std::iter::once(x.as_str()).chain(series.as_deref()).collect()
            }
            SectionLayout::Comparison { group, date, .. } => vec![group.as_str(), date.as_str()],
        }
    }
}

/// One configured report section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionSpec {
    pub title: String,
    /// Name of the aggregation feeding the section.
    pub source: String,
    pub layout: SectionLayout,
    /// Repeat the section once per value of this dimension.
    #[serde(default)]
    pub split_by: Option<String>,
    /// List the distinct values of this dimension under the title.
    #[serde(default)]
    pub members: Option<String>,
    /// Position in the report; defaults to the declaration index.
    #[serde(default)]
    pub order: Option<i32>,
}

fn default_title() -> String {
    "Daily Report".to_string()
}

fn default_delimiter() -> char {
    ','
}

/// Everything one run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Inferred from the output extension when absent.
    #[serde(default)]
    pub format: Option<OutputFormat>,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Abort instead of omitting sections that have no data.
    #[serde(default)]
    pub strict_sections: bool,
    pub schema: Schema,
    /// Fields identifying a duplicate record; empty means all fields.
    #[serde(default)]
    pub identity_key: Vec<String>,
    pub aggregations: Vec<AggregationSpec>,
    #[serde(default)]
    pub formatting: FormatSpec,
    pub sections: Vec<SectionSpec>,
}

impl PipelineConfig {
    /// Read a JSON config. Relative `input`/`output` paths are taken relative
    /// to the config file's directory.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: PipelineConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(base) = path.parent() {
            if config.input.is_relative() {
                config.input = base.join(&config.input);
            }
            if config.output.is_relative() {
                config.output = base.join(&config.output);
            }
        }
        Ok(config)
    }

    pub fn output_format(&self) -> OutputFormat {
        self.format
            .unwrap_or_else(|| OutputFormat::infer(&self.output))
    }

    pub fn delimiter_byte(&self) -> u8 {
        // validate() guarantees ASCII
        self.delimiter as u8
    }

    pub fn aggregation(&self, name: &str) -> Option<&AggregationSpec> {
        self.aggregations.iter().find(|a| a.name == name)
    }

    /// Check every cross reference so later stages can index without failing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.delimiter.is_ascii() || self.delimiter == '\n' || self.delimiter == '"' {
            return Err(ConfigError::invalid(format!(
                "delimiter {:?} must be a single ASCII character other than newline or quote",
                self.delimiter
            )));
        }
        if self.formatting.chart_width < 100 || self.formatting.chart_height < 100 {
            return Err(ConfigError::invalid("chart size must be at least 100x100"));
        }

        self.schema.validate()?;

        for field in &self.identity_key {
            if self.schema.field_type(field).is_none() {
                return Err(ConfigError::invalid(format!(
                    "identity key field '{}' is not in the schema",
                    field
                )));
            }
        }

        let mut names = HashSet::new();
        for aggregation in &self.aggregations {
            self.validate_aggregation(aggregation)?;
            if !names.insert(aggregation.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "aggregation '{}' declared twice",
                    aggregation.name
                )));
            }
        }

        if self.sections.is_empty() {
            return Err(ConfigError::invalid("no sections configured"));
        }
        for section in &self.sections {
            self.validate_section(section)?;
        }
        Ok(())
    }

    fn validate_aggregation(&self, aggregation: &AggregationSpec) -> Result<(), ConfigError> {
        let context = |msg: String| ConfigError::invalid(format!("aggregation '{}': {}", aggregation.name, msg));

        if aggregation.group_by.is_empty() {
            return Err(context("group_by is empty".into()));
        }
        if aggregation.metrics.is_empty() {
            return Err(context("no metrics".into()));
        }
        for field in &aggregation.group_by {
            match self.schema.field_type(field) {
                Some(t) if t.is_dimension() => {}
                Some(_) => return Err(context(format!("'{}' is numeric and cannot be grouped on", field))),
                None => return Err(context(format!("unknown field '{}'", field))),
            }
        }

        for field in &aggregation.require_present {
            match self.schema.field_type(field) {
                Some(t) if t.is_text() => {}
                _ => return Err(context(format!("require_present '{}' is not a text field", field))),
            }
        }

        let mut metric_names = HashSet::new();
        for metric in &aggregation.metrics {
            if aggregation.group_by.contains(&metric.name) {
                return Err(context(format!("metric '{}' shadows a dimension", metric.name)));
            }
            if !metric_names.insert(metric.name.as_str()) {
                return Err(context(format!("metric '{}' declared twice", metric.name)));
            }
            for field in metric.formula.fields() {
                if self.schema.field_type(field).is_none() {
                    return Err(context(format!("metric '{}': unknown field '{}'", metric.name, field)));
                }
            }
            for field in metric.formula.numeric_fields() {
                if self.schema.field_type(field) != Some(SemanticType::Numeric) {
                    return Err(context(format!(
                        "metric '{}': field '{}' is not numeric",
                        metric.name, field
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_section(&self, section: &SectionSpec) -> Result<(), ConfigError> {
        let context = |msg: String| ConfigError::invalid(format!("section '{}': {}", section.title, msg));

        let aggregation = self
            .aggregation(&section.source)
            .ok_or_else(|| context(format!("unknown source '{}'", section.source)))?;

        for metric in section.layout.metrics() {
            if !aggregation.metrics.iter().any(|m| m.name == metric) {
                return Err(context(format!("unknown metric '{}'", metric)));
            }
        }
        for dimension in section
            .layout
            .dimensions()
            .into_iter()
            .chain(section.split_by.as_deref())
            .chain(section.members.as_deref())
        {
            if !aggregation.group_by.iter().any(|g| g == dimension) {
                return Err(context(format!(
                    "'{}' is not a dimension of '{}'",
                    dimension, aggregation.name
                )));
            }
        }

        let date_dimension = |name: &str| self.schema.field_type(name) == Some(SemanticType::Date);
        match &section.layout {
            SectionLayout::Table {
                metrics,
                period_totals: Some(date),
                ..
            } => {
                if !date_dimension(date.as_str()) {
                    return Err(context(format!("period_totals '{}' is not a date field", date)));
                }
                if metrics.is_empty() {
                    return Err(context("no metrics".into()));
                }
            }
            SectionLayout::Table { metrics, .. } | SectionLayout::Comparison { metrics, .. }
                if metrics.is_empty() =>
            {
                return Err(context("no metrics".into()));
            }
            SectionLayout::Line { x, .. } if !date_dimension(x.as_str()) => {
                return Err(context(format!("line x '{}' is not a date field", x)));
            }
            SectionLayout::Comparison { date, .. } if !date_dimension(date.as_str()) => {
                return Err(context(format!("comparison date '{}' is not a date field", date)));
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "input": "daily.csv",
        "output": "out/report.html",
        "schema": {
            "columns": [
                {"name": "date", "type": "date"},
                {"name": "region", "type": "category"},
                {"name": "revenue", "type": "numeric"}
            ]
        },
        "aggregations": [{
            "name": "by_day",
            "group_by": ["date", "region"],
            "metrics": [
                {"name": "revenue", "formula": {"kind": "sum", "field": "revenue"}},
                {"name": "rows", "formula": {"kind": "count"}}
            ]
        }],
        "sections": [
            {"title": "Revenue", "source": "by_day",
             "layout": {"kind": "line", "x": "date", "metric": "revenue", "series": "region"}},
            {"title": "Table", "source": "by_day",
             "layout": {"kind": "table", "metrics": ["revenue"], "period_totals": "date"}}
        ]
    }"#;

    fn config() -> PipelineConfig {
        serde_json::from_str(CONFIG).unwrap()
    }

    #[test]
    fn parses_with_defaults_and_validates() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.title, "Daily Report");
        assert_eq!(config.delimiter, ',');
        assert_eq!(config.formatting.decimals, 2);
        assert_eq!(config.output_format(), OutputFormat::Html);
    }

    #[test]
    fn zip_extension_selects_bundle() {
        let mut config = config();
        config.output = PathBuf::from("report.ZIP");
        assert_eq!(config.output_format(), OutputFormat::Bundle);
        config.format = Some(OutputFormat::Html);
        assert_eq!(config.output_format(), OutputFormat::Html);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = CONFIG.replacen("\"input\"", "\"inptu\": 1, \"input\"", 1);
        assert!(serde_json::from_str::<PipelineConfig>(&text).is_err());
    }

    #[test]
    fn section_metric_must_exist() {
        let mut config = config();
        config.sections[0].layout = SectionLayout::Bar {
            x: "region".into(),
            metric: "profit".into(),
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("profit"), "{err}");
    }

    #[test]
    fn line_needs_date_axis() {
        let mut config = config();
        config.sections[0].layout = SectionLayout::Line {
            x: "region".into(),
            metric: "revenue".into(),
            series: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn numeric_group_by_is_rejected() {
        let mut config = config();
        config.aggregations[0].group_by.push("revenue".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn split_by_must_be_a_dimension_of_the_source() {
        let mut config = config();
        config.sections[0].split_by = Some("revenue".into());
        assert!(config.validate().is_err());
        config.sections[0].split_by = Some("region".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn members_must_be_a_dimension_of_the_source() {
        let mut config = config();
        config.sections[0].members = Some("unknown".into());
        assert!(config.validate().is_err());
        config.sections[0].members = Some("region".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn relative_paths_follow_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(&path, CONFIG).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.input, dir.path().join("daily.csv"));
        assert_eq!(config.output, dir.path().join("out/report.html"));
    }

    #[test]
    fn missing_config_file_is_io_error() {
        let err = PipelineConfig::from_json_file(Path::new("/no/such/config.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
