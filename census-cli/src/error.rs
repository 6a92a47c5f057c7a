//! Error types emitted by the census CLI.
//!
//! Keep this error type reasonably small, as many CLI helpers return
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use census_core::{MetadataError, PipelineError};
use census_data::{
    AttributeError, PostgisError, ReleaseError, ShapeError, WorkbookError,
};
use thiserror::Error;

/// Errors emitted by the census CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// The release directory does not exist or is not a directory.
    #[error("release directory {path:?} does not exist")]
    MissingReleaseDirectory { path: Utf8PathBuf },
    /// A referenced path could not be inspected due to an IO error.
    #[error("failed to inspect {field} path {path:?}: {source}")]
    InspectPath {
        field: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The division file could not be read.
    #[error("failed to read division linkages from {path:?}: {source}")]
    ReadDivisions {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The division file is not valid JSON.
    #[error("failed to parse division linkages in {path:?}: {source}")]
    ParseDivisions {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The scratch directory could not be created.
    #[error("failed to prepare scratch directory: {0}")]
    Scratch(#[source] std::io::Error),
    /// Logging could not be installed.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
    /// Release discovery failed.
    #[error(transparent)]
    Release(#[from] ReleaseError),
    /// A datapack file name was not recognised.
    #[error(transparent)]
    Attribute(#[from] AttributeError),
    /// Importing boundaries failed.
    #[error(transparent)]
    Shape(#[from] ShapeError),
    /// Reading metadata workbooks failed.
    #[error(transparent)]
    Workbook(#[from] WorkbookError),
    /// The metadata catalogue was rejected.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    /// Connecting to or preparing the database failed.
    #[error(transparent)]
    Postgis(#[from] PostgisError),
    /// The catalogue tables could not be created.
    #[error("failed to create catalogue tables: {0}")]
    Catalogue(#[source] census_core::DatabaseError),
    /// A pipeline stage failed.
    #[error(transparent)]
    Pipeline(#[from] Box<PipelineError>),
    /// Writing command output failed.
    #[error("failed to write output: {0}")]
    WriteOutput(#[source] std::io::Error),
}

impl From<PipelineError> for CliError {
    fn from(err: PipelineError) -> Self {
        Self::Pipeline(Box::new(err))
    }
}
