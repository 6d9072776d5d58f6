//! Core data model for conversion batches.
//!
//! This module defines the main data structures for representing a batch run:
//! - ConversionJob: a single source file scheduled for conversion
//! - JobStatus: the per-job state machine
//! - BatchSummary / BatchReport: aggregate outcome of a run
//! - OutputLayout, ConvertOptions: read-only batch configuration

use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::verify::ChecksumAlgorithm;

/// The single recognized lossless input extension (matched case-insensitively).
pub const INPUT_EXT: &str = "flac";

/// Extension of every produced output (ALAC in an MP4/M4A container).
pub const OUTPUT_EXT: &str = "m4a";

/// A single source file scheduled for conversion.
///
/// Created in `Queued` state when the job list is built, claimed by exactly
/// one worker, and finished in exactly one terminal state. Observers only
/// ever see cloned snapshots.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// Unique identifier for this job within the batch
    pub id: Uuid,

    /// Absolute path of the input file
    pub source: PathBuf,

    /// Absolute path the converted file is written to
    pub destination: PathBuf,

    /// Current state; moves strictly forward, never revisits an earlier state
    pub status: JobStatus,

    /// Skip reason or error text once the job is terminal
    pub message: Option<String>,
}

impl ConversionJob {
    /// Create a new job in `Queued` state.
    pub fn new(source: PathBuf, destination: PathBuf) -> Self {
        ConversionJob {
            id: Uuid::new_v4(),
            source,
            destination,
            status: JobStatus::Queued,
            message: None,
        }
    }
}

/// The state of an individual conversion within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Waiting for a worker
    Queued,
    /// Claimed by a worker, conversion in flight
    Running,
    /// Converted (and verified, when requested) successfully
    Done,
    /// Output was already up to date
    Skipped,
    /// Conversion or verification failed; see the job message
    Failed,
}

impl JobStatus {
    /// Returns true if this state is terminal (no further changes expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Skipped | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Skipped => write!(f, "skipped"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregate counts for a completed batch.
///
/// `done + skipped + failed` always equals the number of dispatched jobs
/// once `run_batch` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Jobs that converted successfully
    pub done: usize,
    /// Jobs skipped because the output was up to date
    pub skipped: usize,
    /// Jobs that failed
    pub failed: usize,
}

impl BatchSummary {
    /// Fold one terminal status into the counts.
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Done => self.done += 1,
            JobStatus::Skipped => self.skipped += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Queued | JobStatus::Running => {}
        }
    }

    /// Total number of recorded jobs.
    pub fn total(&self) -> usize {
        self.done + self.skipped + self.failed
    }
}

/// What `run_batch` hands back: every job in its terminal state (sorted
/// case-insensitively by source path) plus the summary counts.
#[derive(Debug)]
pub struct BatchReport {
    pub jobs: Vec<ConversionJob>,
    pub summary: BatchSummary,
}

/// Where outputs are placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLayout {
    /// Next to each input, differing only in extension
    InPlace,
    /// Under an output root; a sole directory input has its structure mirrored
    Directory(PathBuf),
}

/// Read-only configuration for one batch run. No job may mutate it.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Output placement rule
    pub layout: OutputLayout,

    /// Reprocess even when the output is fresh, and let the converter
    /// replace existing files
    pub overwrite: bool,

    /// Maximum number of concurrently running conversions (minimum 1)
    pub workers: usize,

    /// Map an embedded picture stream into the output as cover art
    pub keep_artwork: bool,

    /// Decode both sides to PCM after converting and compare digests
    pub verify: bool,

    /// Digest algorithm used for verification
    pub checksum: ChecksumAlgorithm,

    /// Remove the source file after a fully successful conversion
    pub delete_original: bool,
}

impl ConvertOptions {
    /// Options with the given layout and conservative defaults: no
    /// overwrite, serial execution, artwork kept, no verification.
    pub fn new(layout: OutputLayout) -> Self {
        ConvertOptions {
            layout,
            overwrite: false,
            workers: 1,
            keep_artwork: true,
            verify: false,
            checksum: ChecksumAlgorithm::default(),
            delete_original: false,
        }
    }
}
