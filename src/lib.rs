//! Daily Report - CSV export cleaning, aggregation & report generation
//!
//! Pipeline stages, leaf-first:
//! load (`data::DataLoader`) -> clean (`data::DataCleaner`) ->
//! aggregate (`stats::Aggregator`) -> render (`charts::SectionRenderer`) ->
//! assemble (`report::ReportAssembler`).

pub mod charts;
pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod stats;

pub use config::{OutputFormat, PipelineConfig};
pub use error::{ConfigError, PipelineError};
pub use pipeline::{build_report, run, RunSummary};
pub use report::ReportArtifact;
