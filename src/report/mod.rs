//! Report module - Assembling rendered sections into the daily report and
//! writing it as HTML or as a ZIP bundle.

mod bundle;
mod html;
mod plan;

pub use bundle::{MANIFEST_ENTRY, REPORT_ENTRY};
pub use plan::plan_sections;

use crate::charts::RenderedSection;
use crate::config::OutputFormat;
use crate::data::{CleanOutcome, SourceInfo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
#[error("cannot write report to {path}: {source}")]
pub struct WriteError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

/// Facts about one run, shown in the narrative and stored in the bundle manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub generated_at: DateTime<Utc>,
    pub source: SourceInfo,
    pub rows_processed: usize,
    pub rows_clean: usize,
    pub rows_rejected: usize,
    pub rejected_by_reason: BTreeMap<String, usize>,
    pub duplicates: usize,
    pub defaulted_values: usize,
    pub omitted_sections: Vec<String>,
}

impl RunMetadata {
    pub fn new(
        generated_at: DateTime<Utc>,
        source: SourceInfo,
        outcome: &CleanOutcome,
        omitted_sections: Vec<String>,
    ) -> Self {
        Self {
            generated_at,
            source,
            rows_processed: outcome.raw_count,
            rows_clean: outcome.table.len(),
            rows_rejected: outcome.rejected_count(),
            rejected_by_reason: outcome
                .reject_breakdown()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            duplicates: outcome.duplicate_count,
            defaulted_values: outcome.defaulted_values,
            omitted_sections,
        }
    }
}

/// The finished report, held in memory until written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportArtifact {
    pub title: String,
    pub metadata: RunMetadata,
    pub narrative: Vec<String>,
    pub sections: Vec<RenderedSection>,
}

impl ReportArtifact {
    /// Single self-contained document with inline SVG charts.
    pub fn to_html(&self) -> String {
        html::render_document(self, html::ChartEmbed::Inline)
    }

    /// ZIP archive bytes: report.html, charts/NN-name.svg, manifest.json.
    pub fn to_bundle(&self) -> std::io::Result<Vec<u8>> {
        bundle::build(self)
    }

    /// Write the report, creating parent directories. The file is written
    /// next to its destination and renamed into place. The artifact is left
    /// untouched on failure, so it can be written again elsewhere.
    pub fn write(&self, path: &Path, format: OutputFormat) -> Result<PathBuf, WriteError> {
        let fail = |source: std::io::Error| WriteError {
            path: path.to_path_buf(),
            source,
        };

        let bytes = match format {
            OutputFormat::Html => self.to_html().into_bytes(),
            OutputFormat::Bundle => self.to_bundle().map_err(fail)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(fail)?;
        }

        // atomic: write .tmp then rename
        let tmp_path = temp_path(path);
        if let Err(e) = fs::write(&tmp_path, &bytes) {
            let _ = fs::remove_file(&tmp_path);
            return Err(fail(e));
        }
        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(fail(e));
        }

        info!(
            path = %path.display(),
            format = ?format,
            bytes = bytes.len(),
            sections = self.sections.len(),
            "report written"
        );
        Ok(path.to_path_buf())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Orders sections and writes the run narrative.
pub struct ReportAssembler {
    title: String,
}

impl ReportAssembler {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
        }
    }

    /// Sections are ordered by `order`; equal orders keep their incoming order.
    pub fn assemble(&self, mut sections: Vec<RenderedSection>, metadata: RunMetadata) -> ReportArtifact {
        sections.sort_by_key(|s| s.order);
        let narrative = Self::narrative(&metadata);
        ReportArtifact {
            title: self.title.clone(),
            metadata,
            narrative,
            sections,
        }
    }

    fn narrative(meta: &RunMetadata) -> Vec<String> {
        let mut lines = vec![
            format!(
                "Source: {} ({} bytes, sha256 {})",
                meta.source.path.display(),
                meta.source.bytes,
                meta.source.sha256
            ),
            format!(
                "Rows processed: {}; clean: {}; rejected: {}; duplicates: {}",
                meta.rows_processed, meta.rows_clean, meta.rows_rejected, meta.duplicates
            ),
        ];
        if !meta.rejected_by_reason.is_empty() {
            let reasons: Vec<String> = meta
                .rejected_by_reason
                .iter()
                .map(|(reason, n)| format!("{} {}", reason, n))
                .collect();
            lines.push(format!("Rejected by reason: {}", reasons.join(", ")));
        }
        if meta.defaulted_values > 0 {
            lines.push(format!(
                "Optional values replaced by defaults: {}",
                meta.defaulted_values
            ));
        }
        if !meta.omitted_sections.is_empty() {
            lines.push(format!(
                "Omitted sections (no data): {}",
                meta.omitted_sections.join(", ")
            ));
        }
        lines.push(format!(
            "Generated at {}",
            meta.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        lines
    }
}
