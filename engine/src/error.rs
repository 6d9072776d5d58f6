//! Error types for the conversion engine.
//!
//! The primary error type is `EngineError`. Batch-fatal variants
//! (`ToolNotFound`, `NoInputs`, `DuplicateDestination`) are raised before
//! any job starts. Every other variant is caught at the job boundary and
//! recorded as that job's `Failed` message; it never unwinds into the
//! scheduler.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Neither ffmpeg nor afconvert could be resolved on PATH
    #[error("no converter found; install ffmpeg or afconvert")]
    ToolNotFound,

    /// Discovery produced an empty job list
    #[error("no .flac input files found")]
    NoInputs,

    /// Two jobs in one batch target the same output file
    #[error("two inputs map to the same destination: {}", .path.display())]
    DuplicateDestination { path: PathBuf },

    /// The external tool could not be started at all
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    /// The external tool exited non-zero; stderr is the diagnostic
    #[error("{tool} exited with status {code}: {stderr}")]
    Process {
        tool: String,
        code: i32,
        stderr: String,
    },

    /// I/O failure on a pipe to a running tool
    #[error("i/o error talking to {tool}: {source}")]
    Pipe {
        tool: String,
        #[source]
        source: io::Error,
    },

    /// Decoded sample data differs between source and destination
    #[error("decoded audio differs: {} vs {}", .original.display(), .converted.display())]
    VerifyMismatch {
        original: PathBuf,
        converted: PathBuf,
    },

    /// Failed to create an output directory
    #[error("failed to create directory {}: {}", .path.display(), .source)]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to remove a file
    #[error("failed to remove {}: {}", .path.display(), .source)]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
