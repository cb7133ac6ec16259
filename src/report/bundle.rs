//! Report Bundle Module
//! Packs the report as a ZIP: report.html, one SVG per chart, manifest.json.
//!
//! Every entry carries the same fixed timestamp so identical reports give
//! identical archives.

use super::html::{render_document, ChartEmbed};
use super::{ReportArtifact, RunMetadata};
use crate::charts::SectionBody;
use serde::Serialize;
use std::io::{self, Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

pub const REPORT_ENTRY: &str = "report.html";
pub const MANIFEST_ENTRY: &str = "manifest.json";

#[derive(Serialize)]
struct Manifest<'a> {
    title: &'a str,
    metadata: &'a RunMetadata,
    narrative: &'a [String],
    sections: Vec<ManifestSection<'a>>,
}

#[derive(Serialize)]
struct ManifestSection<'a> {
    title: &'a str,
    order: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtitle: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<&'a str>,
    body: &'a SectionBody,
}

pub(crate) fn build(artifact: &ReportArtifact) -> io::Result<Vec<u8>> {
    let files: Vec<Option<String>> = artifact
        .sections
        .iter()
        .enumerate()
        .map(|(idx, section)| match section.body {
            SectionBody::Chart(_) => Some(format!("charts/{:02}-{}.svg", idx + 1, slug(&section.title))),
            SectionBody::Table(_) => None,
        })
        .collect();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    // 1. report.html
    zip.start_file(REPORT_ENTRY, options).map_err(zip_error)?;
    zip.write_all(render_document(artifact, ChartEmbed::Linked(&files)).as_bytes())?;

    // 2. charts/*.svg
    for (section, file) in artifact.sections.iter().zip(&files) {
        if let (SectionBody::Chart(chart), Some(file)) = (&section.body, file) {
            zip.start_file(file.as_str(), options).map_err(zip_error)?;
            zip.write_all(chart.svg.as_bytes())?;
        }
    }

    // 3. manifest.json
    let manifest = Manifest {
        title: &artifact.title,
        metadata: &artifact.metadata,
        narrative: &artifact.narrative,
        sections: artifact
            .sections
            .iter()
            .zip(&files)
            .map(|(section, file)| ManifestSection {
                title: &section.title,
                order: section.order,
                subtitle: section.subtitle.as_deref(),
                file: file.as_deref(),
                body: &section.body,
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    zip.start_file(MANIFEST_ENTRY, options).map_err(zip_error)?;
    zip.write_all(json.as_bytes())?;

    let cursor = zip.finish().map_err(zip_error)?;
    Ok(cursor.into_inner())
}

fn zip_error(e: zip::result::ZipError) -> io::Error {
    match e {
        zip::result::ZipError::Io(err) => err,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

/// File-name-safe form of a section title.
fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "chart".to_string()
    } else {
        trimmed.to_string()
    }
}
