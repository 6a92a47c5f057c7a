//! Export of the finalised schema through an external dump utility.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// What to dump and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRequest {
    /// Schema namespace to export.
    pub schema: String,
    /// Archive path to write.
    pub destination: PathBuf,
}

/// Result of a successful dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpOutcome {
    /// Archive path written.
    pub destination: PathBuf,
}

/// Errors raised by a [`DumpRunner`].
#[derive(Debug, Error)]
pub enum DumpError {
    /// The utility could not be started.
    #[error("failed to run {program}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The utility exited unsuccessfully. `stderr` is its diagnostic output,
    /// unmodified.
    #[error("database dump failed: {stderr}")]
    Failed {
        /// Exit code, absent when terminated by a signal.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
}

/// Runs the external dump utility.
pub trait DumpRunner {
    /// Export `request.schema` into `request.destination`.
    fn dump(&self, request: &DumpRequest) -> Result<DumpOutcome, DumpError>;
}
