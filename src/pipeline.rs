//! Pipeline Module
//! load -> clean -> aggregate -> render -> assemble -> write.

use crate::charts::{RenderError, SectionRenderer};
use crate::config::{OutputFormat, PipelineConfig};
use crate::data::{DataCleaner, DataLoader};
use crate::error::PipelineError;
use crate::report::{plan_sections, ReportArtifact, ReportAssembler, RunMetadata};
use crate::stats::Aggregator;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Result of a successful run.
#[derive(Debug)]
pub struct RunSummary {
    pub artifact: ReportArtifact,
    pub output: PathBuf,
    pub format: OutputFormat,
}

/// Build the report in memory. `generated_at` is the only input besides the
/// config and the source file, so a fixed timestamp gives a repeatable report.
pub fn build_report(
    config: &PipelineConfig,
    generated_at: DateTime<Utc>,
) -> Result<ReportArtifact, PipelineError> {
    config.validate()?;

    let raw = DataLoader::new(config.delimiter_byte()).load(&config.input, &config.schema)?;
    let source = raw.source.clone();
    let outcome = DataCleaner::new(&config.schema, &config.identity_key).clean(raw)?;

    let mut tables = BTreeMap::new();
    for spec in &config.aggregations {
        let table = Aggregator::aggregate(&outcome.table, spec)?;
        tables.insert(spec.name.clone(), table);
    }

    let renderer = SectionRenderer::new(&config.formatting);
    let mut sections = Vec::new();
    let mut omitted = Vec::new();
    for input in plan_sections(&config.sections, &tables)? {
        match renderer.render(&input) {
            Ok(section) => sections.push(section),
            Err(RenderError::EmptyData { section }) if !config.strict_sections => {
                warn!(section = %section, "section has no data, omitted");
                omitted.push(section);
            }
            Err(e) => return Err(e.into()),
        }
    }
    info!(
        rendered = sections.len(),
        omitted = omitted.len(),
        "sections rendered"
    );

    let metadata = RunMetadata::new(generated_at, source, &outcome, omitted);
    Ok(ReportAssembler::new(&config.title).assemble(sections, metadata))
}

/// Build the report and write it to the configured output.
///
/// On a write failure the error carries the finished artifact so the caller
/// can retry elsewhere without recomputing.
pub fn run(config: &PipelineConfig) -> Result<RunSummary, PipelineError> {
    let artifact = build_report(config, Utc::now())?;
    let format = config.output_format();

    match artifact.write(&config.output, format) {
        Ok(output) => Ok(RunSummary {
            artifact,
            output,
            format,
        }),
        Err(source) => Err(PipelineError::Write {
            source,
            artifact: Box::new(artifact),
        }),
    }
}
