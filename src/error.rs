//! Error Module
//! Configuration errors and the run-level error that folds every stage error.

use crate::charts::RenderError;
use crate::data::{CleanerError, LoaderError};
use crate::report::{ReportArtifact, WriteError};
use crate::stats::AggregateError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }
}

/// A run-aborting failure, tagged with the stage it came from.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("[config] {0}")]
    Config(#[from] ConfigError),
    #[error("[load] {0}")]
    Load(#[from] LoaderError),
    #[error("[clean] {0}")]
    Clean(#[from] CleanerError),
    #[error("[aggregate] {0}")]
    Aggregate(#[from] AggregateError),
    #[error("[render] {0}")]
    Render(#[from] RenderError),
    /// The report was fully built but could not be persisted. The artifact
    /// travels with the error so it can be written somewhere else.
    #[error("[write] {source}")]
    Write {
        source: WriteError,
        artifact: Box<ReportArtifact>,
    },
}

impl PipelineError {
    /// Name of the pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::Load(_) => "load",
            PipelineError::Clean(_) => "clean",
            PipelineError::Aggregate(_) => "aggregate",
            PipelineError::Render(_) => "render",
            PipelineError::Write { .. } => "write",
        }
    }

    /// Recover the in-memory report from a write failure.
    pub fn into_artifact(self) -> Option<ReportArtifact> {
        match self {
            PipelineError::Write { artifact, .. } => Some(*artifact),
            _ => None,
        }
    }
}
