//! Batch planning and execution.
//!
//! This module provides the two halves of a batch run:
//! - Planning: expanding inputs into a sorted, `Queued` job list with
//!   deterministic destinations
//! - Execution: a bounded worker pool that drives each job through its
//!   state machine and folds the outcomes into a summary

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use tracing::warn;

use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{
    BatchReport, BatchSummary, ConversionJob, ConvertOptions, JobStatus, OutputLayout, OUTPUT_EXT,
};
use crate::progress::{emit, ProgressEvent};
use crate::tools::{self, Converter, Toolchain};
use crate::verify;

/// Build the sorted, `Queued` job list for the given inputs.
///
/// When the sole input argument is a directory it becomes the mirror
/// root: relative structure beneath it is reproduced under the output
/// directory. Any other shape of input list maps to flat basenames.
pub fn plan_jobs(
    inputs: &[PathBuf],
    options: &ConvertOptions,
) -> Result<Vec<ConversionJob>, EngineError> {
    let mirror_root = match inputs {
        [only] if only.is_dir() => Some(fs_ops::absolutize(only)),
        _ => None,
    };

    let mut sources: Vec<PathBuf> = fs_ops::gather_inputs(inputs)
        .iter()
        .map(|source| fs_ops::absolutize(source))
        .collect();
    if sources.is_empty() {
        return Err(EngineError::NoInputs);
    }
    sources.sort_by_key(|path| fs_ops::path_sort_key(path));

    Ok(sources
        .into_iter()
        .map(|source| {
            let destination = destination_for(&source, &options.layout, mirror_root.as_deref());
            ConversionJob::new(source, destination)
        })
        .collect())
}

/// Compute the destination path for one source file.
///
/// Deterministic in (source, layout): in-place swaps the extension,
/// mirror layout reproduces the path relative to `mirror_root` under the
/// output directory, anything else lands flat in the output directory. A
/// source that does not live under the mirror root falls back to the
/// flat rule rather than failing.
fn destination_for(source: &Path, layout: &OutputLayout, mirror_root: Option<&Path>) -> PathBuf {
    match layout {
        OutputLayout::InPlace => source.with_extension(OUTPUT_EXT),
        OutputLayout::Directory(dir) => {
            if let Some(root) = mirror_root {
                if let Ok(rel) = source.strip_prefix(root) {
                    return dir.join(rel).with_extension(OUTPUT_EXT);
                }
            }
            // Sources come from discovery and always name a regular file.
            let flat = source.file_name().unwrap_or(source.as_os_str());
            dir.join(flat).with_extension(OUTPUT_EXT)
        }
    }
}

/// Reject job lists where two jobs would silently race on one output.
fn check_distinct_destinations(jobs: &[ConversionJob]) -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for job in jobs {
        if !seen.insert(job.destination.as_path()) {
            return Err(EngineError::DuplicateDestination {
                path: job.destination.clone(),
            });
        }
    }
    Ok(())
}

/// Execute every job with at most `options.workers` running concurrently.
///
/// The worker pool doubles as the admission gate: a fixed number of
/// threads drain a shared queue, so a slot is freed on every exit path of
/// a job body by construction. Per-job failures are folded into that
/// job's terminal state and never abort the batch or its siblings. The
/// call returns only once every dispatched job is terminal, and the
/// report's counts always sum to the number of dispatched jobs.
pub fn run_batch(
    jobs: Vec<ConversionJob>,
    options: &ConvertOptions,
    toolchain: &Toolchain,
    progress: Option<&Sender<ProgressEvent>>,
) -> Result<BatchReport, EngineError> {
    if jobs.is_empty() {
        return Err(EngineError::NoInputs);
    }
    if !options.overwrite {
        check_distinct_destinations(&jobs)?;
    }
    if options.verify && toolchain.verifier.is_none() {
        warn!("verification requested but ffmpeg is unavailable; conversions will not be verified");
    }

    let total = jobs.len();
    emit(progress, ProgressEvent::BatchStarted { total });

    let (queue_tx, queue_rx) = unbounded();
    for job in jobs {
        // The receiver outlives this loop; an unbounded send cannot fail.
        let _ = queue_tx.send(job);
    }
    drop(queue_tx);

    let summary = Mutex::new(BatchSummary::default());
    let finished = Mutex::new(Vec::with_capacity(total));
    let workers = options.workers.max(1).min(total);

    thread::scope(|scope| {
        for _ in 0..workers {
            let queue_rx = queue_rx.clone();
            let summary = &summary;
            let finished = &finished;
            scope.spawn(move || {
                while let Ok(mut job) = queue_rx.recv() {
                    process_job(&mut job, options, toolchain, progress);
                    summary.lock().unwrap().record(job.status);
                    finished.lock().unwrap().push(job);
                }
            });
        }
    });

    let mut jobs = finished.into_inner().unwrap();
    jobs.sort_by_key(|job| fs_ops::path_sort_key(&job.source));
    let summary = summary.into_inner().unwrap();

    emit(progress, ProgressEvent::BatchFinished(summary));
    Ok(BatchReport { jobs, summary })
}

/// Drive one job from `Queued` to a terminal state, publishing each
/// transition.
fn process_job(
    job: &mut ConversionJob,
    options: &ConvertOptions,
    toolchain: &Toolchain,
    progress: Option<&Sender<ProgressEvent>>,
) {
    job.status = JobStatus::Running;
    emit(progress, ProgressEvent::JobChanged(job.clone()));

    if !options.overwrite && fs_ops::is_up_to_date(&job.source, &job.destination) {
        job.status = JobStatus::Skipped;
        job.message = Some("output is up to date".to_string());
        emit(progress, ProgressEvent::JobChanged(job.clone()));
        return;
    }

    match convert_one(job, options, toolchain) {
        Ok(()) => job.status = JobStatus::Done,
        Err(err) => {
            job.status = JobStatus::Failed;
            job.message = Some(err.to_string());
        }
    }
    emit(progress, ProgressEvent::JobChanged(job.clone()));
}

/// The fallible body of a job: directories, transcode, verification,
/// original cleanup. Every error returned here fails only this job.
fn convert_one(
    job: &ConversionJob,
    options: &ConvertOptions,
    toolchain: &Toolchain,
) -> Result<(), EngineError> {
    fs_ops::ensure_parent_dir(&job.destination)?;

    // afconvert has no overwrite flag; clear the way for it ourselves.
    if let Converter::Afconvert(_) = toolchain.converter {
        if options.overwrite && job.destination.exists() {
            fs::remove_file(&job.destination).map_err(|source| EngineError::Remove {
                path: job.destination.clone(),
                source,
            })?;
        }
    }

    let args = toolchain.converter.transcode_args(
        &job.source,
        &job.destination,
        options.overwrite,
        options.keep_artwork,
    );
    if let Err(err) = tools::run(toolchain.converter.program(), &args) {
        fs_ops::discard_empty_artifact(&job.destination);
        return Err(err);
    }

    if options.verify {
        if let Some(ffmpeg) = &toolchain.verifier {
            verify::verify_round_trip(ffmpeg, &job.source, &job.destination, options.checksum)?;
        }
    }

    if options.delete_original {
        if let Err(err) = fs::remove_file(&job.source) {
            warn!(path = %job.source.display(), "converted but could not remove original: {err}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutputLayout;

    fn touch(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, contents).expect("write");
    }

    fn options_into(dir: &Path) -> ConvertOptions {
        ConvertOptions::new(OutputLayout::Directory(dir.to_path_buf()))
    }

    #[test]
    fn inplace_destination_swaps_extension_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("albums/song.flac");
        touch(&src, b"x");

        let options = ConvertOptions::new(OutputLayout::InPlace);
        let jobs = plan_jobs(&[src.clone()], &options).expect("plan");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].destination, temp.path().join("albums/song.m4a"));
    }

    #[test]
    fn sole_directory_input_mirrors_structure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let music = temp.path().join("music");
        touch(&music.join("artist/album/track.flac"), b"x");
        touch(&music.join("single.flac"), b"x");
        let out = temp.path().join("out");

        let jobs = plan_jobs(&[music.clone()], &options_into(&out)).expect("plan");
        let destinations: Vec<_> = jobs.iter().map(|j| j.destination.clone()).collect();
        assert!(destinations.contains(&out.join("artist/album/track.m4a")));
        assert!(destinations.contains(&out.join("single.m4a")));
    }

    #[test]
    fn multiple_inputs_flatten_into_output_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        touch(&a.join("deep/one.flac"), b"x");
        touch(&b.join("two.flac"), b"x");
        let out = temp.path().join("out");

        let jobs = plan_jobs(&[a, b], &options_into(&out)).expect("plan");
        let destinations: Vec<_> = jobs.iter().map(|j| j.destination.clone()).collect();
        assert!(destinations.contains(&out.join("one.m4a")));
        assert!(destinations.contains(&out.join("two.m4a")));
    }

    #[test]
    fn planning_with_no_matches_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = temp.path().join("out");
        let err = plan_jobs(&[temp.path().to_path_buf()], &options_into(&out))
            .expect_err("empty directory");
        assert!(matches!(err, EngineError::NoInputs));
    }

    #[test]
    fn jobs_are_sorted_by_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let music = temp.path().join("music");
        touch(&music.join("b.flac"), b"x");
        touch(&music.join("A.flac"), b"x");
        let out = temp.path().join("out");

        let jobs = plan_jobs(&[music], &options_into(&out)).expect("plan");
        assert!(jobs[0].source.ends_with("A.flac"));
        assert!(jobs[1].source.ends_with("b.flac"));
    }

    #[test]
    fn duplicate_destinations_are_rejected() {
        let jobs = vec![
            ConversionJob::new("/x/a/song.flac".into(), "/out/song.m4a".into()),
            ConversionJob::new("/x/b/song.flac".into(), "/out/song.m4a".into()),
        ];
        let err = check_distinct_destinations(&jobs).expect_err("same destination twice");
        assert!(matches!(err, EngineError::DuplicateDestination { .. }));
    }

    #[cfg(unix)]
    mod with_stub_converter {
        use super::*;
        use crossbeam_channel::unbounded;
        use std::os::unix::fs::PermissionsExt;

        fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
            let mut perms = fs::metadata(&path).expect("stat").permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms).expect("chmod");
            path
        }

        /// ffmpeg stand-in: copies the file named after `-i` to the last
        /// argument. Fails loudly when the source name contains "bad".
        fn copying_converter(dir: &Path) -> Toolchain {
            let body = concat!(
                "prev=\"\"\n",
                "src=\"\"\n",
                "for a in \"$@\"; do\n",
                "  if [ \"$prev\" = \"-i\" ]; then src=\"$a\"; fi\n",
                "  prev=\"$a\"\n",
                "done\n",
                "dst=\"$a\"\n",
                "case \"$src\" in *bad*) echo 'unreadable stream' >&2; exit 1;; esac\n",
                "cp \"$src\" \"$dst\"\n",
            );
            Toolchain {
                converter: Converter::Ffmpeg(write_script(dir, "stub-ffmpeg", body)),
                verifier: None,
            }
        }

        /// Decoder stand-in for verification: emits the file named by `-i`.
        fn cat_decoder(dir: &Path) -> PathBuf {
            let body = concat!(
                "prev=\"\"\n",
                "file=\"\"\n",
                "for a in \"$@\"; do\n",
                "  if [ \"$prev\" = \"-i\" ]; then file=\"$a\"; fi\n",
                "  prev=\"$a\"\n",
                "done\n",
                "cat \"$file\"\n",
            );
            write_script(dir, "stub-decoder", body)
        }

        fn seed_library(root: &Path) -> PathBuf {
            let music = root.join("music");
            touch(&music.join("one.flac"), b"first");
            touch(&music.join("sub/two.flac"), b"second");
            touch(&music.join("sub/three.flac"), b"third");
            music
        }

        #[test]
        fn batch_converts_every_job() {
            let temp = tempfile::tempdir().expect("tempdir");
            let music = seed_library(temp.path());
            let out = temp.path().join("out");
            let toolchain = copying_converter(temp.path());
            let mut options = options_into(&out);
            options.workers = 4;

            let jobs = plan_jobs(&[music], &options).expect("plan");
            let report = run_batch(jobs, &options, &toolchain, None).expect("run");

            assert_eq!(report.summary.done, 3);
            assert_eq!(report.summary.skipped, 0);
            assert_eq!(report.summary.failed, 0);
            assert_eq!(report.summary.total(), report.jobs.len());
            assert!(out.join("one.m4a").is_file());
            assert!(out.join("sub/two.m4a").is_file());
            assert!(out.join("sub/three.m4a").is_file());
        }

        #[test]
        fn second_run_skips_fresh_outputs() {
            let temp = tempfile::tempdir().expect("tempdir");
            let music = seed_library(temp.path());
            let out = temp.path().join("out");
            let toolchain = copying_converter(temp.path());
            let options = options_into(&out);

            let first = plan_jobs(&[music.clone()], &options).expect("plan");
            run_batch(first, &options, &toolchain, None).expect("first run");

            let second = plan_jobs(&[music], &options).expect("plan again");
            let report = run_batch(second, &options, &toolchain, None).expect("second run");
            assert_eq!(report.summary.skipped, 3);
            assert_eq!(report.summary.done, 0);
            assert!(report
                .jobs
                .iter()
                .all(|job| job.status == JobStatus::Skipped));
        }

        #[test]
        fn overwrite_reprocesses_fresh_outputs() {
            let temp = tempfile::tempdir().expect("tempdir");
            let music = seed_library(temp.path());
            let out = temp.path().join("out");
            let toolchain = copying_converter(temp.path());
            let mut options = options_into(&out);

            let first = plan_jobs(&[music.clone()], &options).expect("plan");
            run_batch(first, &options, &toolchain, None).expect("first run");

            options.overwrite = true;
            let second = plan_jobs(&[music], &options).expect("plan again");
            let report = run_batch(second, &options, &toolchain, None).expect("second run");
            assert_eq!(report.summary.done, 3);
            assert_eq!(report.summary.skipped, 0);
        }

        #[test]
        fn one_failure_never_cancels_siblings() {
            let temp = tempfile::tempdir().expect("tempdir");
            let music = temp.path().join("music");
            touch(&music.join("good.flac"), b"fine");
            touch(&music.join("bad.flac"), b"broken");
            touch(&music.join("also-good.flac"), b"fine too");
            let out = temp.path().join("out");
            let toolchain = copying_converter(temp.path());
            let mut options = options_into(&out);
            options.workers = 2;

            let jobs = plan_jobs(&[music], &options).expect("plan");
            let report = run_batch(jobs, &options, &toolchain, None).expect("run");

            assert_eq!(report.summary.done, 2);
            assert_eq!(report.summary.failed, 1);
            assert_eq!(report.summary.total(), 3);

            let failed = report
                .jobs
                .iter()
                .find(|job| job.status == JobStatus::Failed)
                .expect("one failed job");
            assert!(failed.source.ends_with("bad.flac"));
            let message = failed.message.as_deref().unwrap_or_default();
            assert!(message.contains("unreadable stream"), "got: {message}");
        }

        #[test]
        fn verification_mismatch_fails_job_and_removes_output() {
            let temp = tempfile::tempdir().expect("tempdir");
            let music = temp.path().join("music");
            touch(&music.join("track.flac"), b"pristine");
            let out = temp.path().join("out");

            // This converter corrupts: the output never matches the input.
            let body = concat!(
                "prev=\"\"\n",
                "for a in \"$@\"; do prev=\"$a\"; done\n",
                "echo mangled > \"$prev\"\n",
            );
            let toolchain = Toolchain {
                converter: Converter::Ffmpeg(write_script(temp.path(), "mangler", body)),
                verifier: Some(cat_decoder(temp.path())),
            };
            let mut options = options_into(&out);
            options.verify = true;

            let jobs = plan_jobs(&[music], &options).expect("plan");
            let report = run_batch(jobs, &options, &toolchain, None).expect("run");

            assert_eq!(report.summary.failed, 1);
            assert_eq!(report.jobs[0].status, JobStatus::Failed);
            assert!(
                !out.join("track.m4a").exists(),
                "mismatched output must be deleted"
            );
        }

        #[test]
        fn verification_passes_for_faithful_conversion() {
            let temp = tempfile::tempdir().expect("tempdir");
            let music = temp.path().join("music");
            touch(&music.join("track.flac"), b"pristine");
            let out = temp.path().join("out");

            let mut toolchain = copying_converter(temp.path());
            toolchain.verifier = Some(cat_decoder(temp.path()));
            let mut options = options_into(&out);
            options.verify = true;

            let jobs = plan_jobs(&[music], &options).expect("plan");
            let report = run_batch(jobs, &options, &toolchain, None).expect("run");
            assert_eq!(report.summary.done, 1);
            assert!(out.join("track.m4a").is_file());
        }

        #[test]
        fn delete_original_removes_source_after_success() {
            let temp = tempfile::tempdir().expect("tempdir");
            let music = temp.path().join("music");
            let src = music.join("track.flac");
            touch(&src, b"data");
            let out = temp.path().join("out");
            let toolchain = copying_converter(temp.path());
            let mut options = options_into(&out);
            options.delete_original = true;

            let jobs = plan_jobs(&[music], &options).expect("plan");
            let report = run_batch(jobs, &options, &toolchain, None).expect("run");
            assert_eq!(report.summary.done, 1);
            assert!(!src.exists(), "original must be gone");
            assert!(out.join("track.m4a").is_file());
        }

        #[test]
        fn duplicate_destinations_abort_before_dispatch() {
            let temp = tempfile::tempdir().expect("tempdir");
            let a = temp.path().join("a");
            let b = temp.path().join("b");
            touch(&a.join("song.flac"), b"one");
            touch(&b.join("song.flac"), b"two");
            let out = temp.path().join("out");
            let toolchain = copying_converter(temp.path());
            let options = options_into(&out);

            // Two input roots flatten both files onto out/song.m4a.
            let jobs = plan_jobs(&[a, b], &options).expect("plan");
            let err = run_batch(jobs, &options, &toolchain, None).expect_err("clashing outputs");
            assert!(matches!(err, EngineError::DuplicateDestination { .. }));
            assert!(!out.join("song.m4a").exists(), "nothing may run");
        }

        #[test]
        fn empty_job_list_is_rejected() {
            let temp = tempfile::tempdir().expect("tempdir");
            let toolchain = copying_converter(temp.path());
            let options = options_into(&temp.path().join("out"));
            let err = run_batch(Vec::new(), &options, &toolchain, None).expect_err("no jobs");
            assert!(matches!(err, EngineError::NoInputs));
        }

        #[test]
        fn events_arrive_in_order_per_job() {
            let temp = tempfile::tempdir().expect("tempdir");
            let music = seed_library(temp.path());
            let out = temp.path().join("out");
            let toolchain = copying_converter(temp.path());
            let mut options = options_into(&out);
            options.workers = 3;

            let jobs = plan_jobs(&[music], &options).expect("plan");
            let total = jobs.len();
            let (tx, rx) = unbounded();
            run_batch(jobs, &options, &toolchain, Some(&tx)).expect("run");
            drop(tx);

            let events: Vec<ProgressEvent> = rx.iter().collect();
            assert!(matches!(
                events.first(),
                Some(ProgressEvent::BatchStarted { total: t }) if *t == total
            ));
            match events.last() {
                Some(ProgressEvent::BatchFinished(summary)) => {
                    assert_eq!(summary.total(), total)
                }
                other => panic!("expected BatchFinished last, got {other:?}"),
            }

            // Per job: Running first, then exactly one terminal state.
            for job_id in events
                .iter()
                .filter_map(|event| match event {
                    ProgressEvent::JobChanged(job) => Some(job.id),
                    _ => None,
                })
                .collect::<HashSet<_>>()
            {
                let transitions: Vec<JobStatus> = events
                    .iter()
                    .filter_map(|event| match event {
                        ProgressEvent::JobChanged(job) if job.id == job_id => Some(job.status),
                        _ => None,
                    })
                    .collect();
                assert_eq!(transitions[0], JobStatus::Running);
                assert_eq!(transitions.len(), 2);
                assert!(transitions[1].is_terminal());
            }
        }
    }
}
