//! flac2alac - Command-line interface for the conversion engine.
//!
//! Argument parsing, live progress printing from the engine's event
//! channel, and exit-code mapping. All conversion logic lives in the
//! engine crate.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use crossbeam_channel::unbounded;
use engine::{
    plan_jobs, run_batch, ChecksumAlgorithm, ConvertOptions, EngineError, JobStatus, OutputLayout,
    ProgressEvent, Toolchain,
};
use tracing_subscriber::EnvFilter;

/// Convert FLAC files to ALAC (M4A), keeping metadata and artwork where possible
#[derive(Parser, Debug)]
#[command(name = "flac2alac")]
#[command(version)]
#[command(about = "Batch-convert FLAC to ALAC (M4A) via ffmpeg or afconvert")]
struct Args {
    /// Input files or directories (defaults to the current directory)
    #[arg(value_name = "PATH")]
    inputs: Vec<PathBuf>,

    /// Output directory; a sole input directory has its structure mirrored
    #[arg(short, long, value_name = "DIR", conflicts_with = "inplace")]
    output: Option<PathBuf>,

    /// Write each output next to its input
    #[arg(long)]
    inplace: bool,

    /// Number of parallel conversions
    #[arg(short, long, value_name = "N", default_value_t = num_cpus::get())]
    workers: usize,

    /// Plan only; print what would be converted and exit
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Overwrite existing outputs instead of skipping fresh ones
    #[arg(short = 'f', long)]
    overwrite: bool,

    /// Do not embed artwork in the outputs
    #[arg(long = "no-art", action = clap::ArgAction::SetFalse)]
    keep_artwork: bool,

    /// Prefer afconvert over ffmpeg when both are available (macOS)
    #[arg(long)]
    prefer_afconvert: bool,

    /// Explicit path to the ffmpeg binary
    #[arg(long, value_name = "PATH")]
    ffmpeg: Option<PathBuf>,

    /// Remove each source after it converts (and verifies) successfully
    #[arg(long)]
    delete_original: bool,

    /// Decode both sides to PCM after converting and compare digests
    #[arg(long)]
    verify: bool,

    /// Digest algorithm for --verify: md5, sha256, or blake3
    #[arg(long, value_name = "ALGORITHM", default_value = "md5", requires = "verify")]
    hash: ChecksumAlgorithm,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    run(Args::parse())
}

fn run(args: Args) -> ExitCode {
    let inputs = if args.inputs.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        args.inputs
    };

    let layout = if args.inplace {
        OutputLayout::InPlace
    } else {
        // Default output root is ./alac under the working directory.
        OutputLayout::Directory(args.output.unwrap_or_else(|| PathBuf::from("alac")))
    };

    let options = ConvertOptions {
        layout,
        overwrite: args.overwrite,
        workers: args.workers.max(1),
        keep_artwork: args.keep_artwork,
        verify: args.verify,
        checksum: args.hash,
        delete_original: args.delete_original,
    };

    let toolchain = match Toolchain::detect(args.prefer_afconvert, args.ffmpeg.as_deref()) {
        Ok(toolchain) => toolchain,
        Err(err) => {
            eprintln!("[ERROR] {err}");
            return ExitCode::from(127);
        }
    };

    let jobs = match plan_jobs(&inputs, &options) {
        Ok(jobs) => jobs,
        Err(EngineError::NoInputs) => {
            eprintln!("[WARN] no .flac files found");
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("[ERROR] {err}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "converter: {} ({})",
        toolchain.converter.name(),
        toolchain.converter.program().display()
    );
    eprintln!("targets: {} file(s)", jobs.len());

    if args.dry_run {
        for job in &jobs {
            println!(
                "[DRY] {} -> {}",
                job.source.display(),
                job.destination.display()
            );
        }
        return ExitCode::SUCCESS;
    }

    // One reporting loop consumes the engine's events while the batch
    // runs on this thread.
    let (tx, rx) = unbounded();
    let reporter = thread::spawn(move || {
        for event in rx {
            if let ProgressEvent::JobChanged(job) = event {
                if !job.status.is_terminal() {
                    continue;
                }
                let tag = match job.status {
                    JobStatus::Done => "OK",
                    JobStatus::Skipped => "SKIP",
                    _ => "FAIL",
                };
                match &job.message {
                    Some(message) => println!(
                        "[{tag}] {} -> {} ({message})",
                        job.source.display(),
                        job.destination.display()
                    ),
                    None => println!(
                        "[{tag}] {} -> {}",
                        job.source.display(),
                        job.destination.display()
                    ),
                }
            }
        }
    });

    let result = run_batch(jobs, &options, &toolchain, Some(&tx));
    drop(tx);
    let _ = reporter.join();

    match result {
        Ok(report) => {
            let summary = report.summary;
            eprintln!(
                "done: {} ok, {} skip, {} fail",
                summary.done, summary.skipped, summary.failed
            );
            if summary.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("[ERROR] {err}");
            ExitCode::FAILURE
        }
    }
}
