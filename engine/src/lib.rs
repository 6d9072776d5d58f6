//! # flac2alac engine - lossless batch conversion library
//!
//! A headless engine for converting FLAC libraries to ALAC (M4A) by
//! driving external command-line encoders. Designed as the foundation for
//! multiple front ends (CLI, GUI, automation).
//!
//! ## Overview
//!
//! The engine owns everything around the actual transcode:
//! - Input discovery and deterministic output path resolution
//! - Skip-if-up-to-date freshness checking for cheap, idempotent reruns
//! - A bounded worker pool executing jobs concurrently
//! - Optional lossless verification (decoded PCM digests must match)
//! - Progress reporting over a channel, decoupled from any UI
//!
//! The decode/encode work itself is delegated to ffmpeg or afconvert,
//! resolved once up front into a [`Toolchain`].
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{plan_jobs, run_batch, ConvertOptions, OutputLayout, Toolchain};
//!
//! # fn main() -> Result<(), engine::EngineError> {
//! let mut options = ConvertOptions::new(OutputLayout::Directory("alac".into()));
//! options.workers = 4;
//!
//! let toolchain = Toolchain::detect(false, None)?;
//! let jobs = plan_jobs(&["music".into()], &options)?;
//! let report = run_batch(jobs, &options, &toolchain, None)?;
//!
//! println!(
//!     "{} converted, {} skipped, {} failed",
//!     report.summary.done, report.summary.skipped, report.summary.failed
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (ConversionJob, BatchSummary, options)
//! - **error**: Error types and handling
//! - **fs_ops**: Input discovery, freshness check, directory handling
//! - **tools**: External converter discovery, argument contracts, invocation
//! - **verify**: Lossless round-trip verification via PCM digests
//! - **job**: Batch planning and the bounded-concurrency scheduler
//! - **progress**: Status events published while a batch runs

pub mod error;
pub mod fs_ops;
pub mod job;
pub mod model;
pub mod progress;
pub mod tools;
pub mod verify;

// Re-export main types and functions
pub use error::EngineError;
pub use job::{plan_jobs, run_batch};
pub use model::{
    BatchReport, BatchSummary, ConversionJob, ConvertOptions, JobStatus, OutputLayout, INPUT_EXT,
    OUTPUT_EXT,
};
pub use progress::ProgressEvent;
pub use tools::{Converter, Toolchain};
pub use verify::{ChecksumAlgorithm, ChecksumValue};
