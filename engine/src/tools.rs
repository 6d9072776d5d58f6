//! External converter tools: discovery, argument contracts, invocation.
//!
//! The engine never touches audio itself; everything goes through one of
//! two command-line tools. Each tool's argument contract lives on its own
//! enum variant so the two very different command lines cannot be mixed
//! up at a call site.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

use crate::error::EngineError;

/// A resolved converter binary together with its argument contract.
#[derive(Debug, Clone)]
pub enum Converter {
    /// ffmpeg: full metadata and cover-art mapping
    Ffmpeg(PathBuf),
    /// afconvert (macOS): fixed codec/container flags, best-effort metadata
    Afconvert(PathBuf),
}

impl Converter {
    /// Short tool name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Converter::Ffmpeg(_) => "ffmpeg",
            Converter::Afconvert(_) => "afconvert",
        }
    }

    /// Resolved path of the underlying binary.
    pub fn program(&self) -> &Path {
        match self {
            Converter::Ffmpeg(path) | Converter::Afconvert(path) => path,
        }
    }

    /// Build the transcode command line for one source/destination pair.
    ///
    /// ffmpeg converts the first audio stream to ALAC, copies metadata,
    /// and optionally maps an embedded picture stream as cover art.
    /// afconvert knows neither overwrite nor stream mapping; the caller
    /// clears existing destinations for it.
    pub fn transcode_args(
        &self,
        source: &Path,
        destination: &Path,
        overwrite: bool,
        keep_artwork: bool,
    ) -> Vec<OsString> {
        match self {
            Converter::Ffmpeg(_) => {
                let mut args: Vec<OsString> = vec![
                    "-hide_banner".into(),
                    "-loglevel".into(),
                    "error".into(),
                    if overwrite { "-y" } else { "-n" }.into(),
                    "-i".into(),
                    source.into(),
                    "-map".into(),
                    "0:a:0".into(),
                    "-c:a".into(),
                    "alac".into(),
                ];
                if keep_artwork {
                    args.extend([
                        OsString::from("-map"),
                        "0:v?".into(),
                        "-c:v".into(),
                        "copy".into(),
                        "-disposition:v:0".into(),
                        "attached_pic".into(),
                    ]);
                }
                args.extend([
                    OsString::from("-map_metadata"),
                    "0".into(),
                    "-movflags".into(),
                    "use_metadata_tags".into(),
                ]);
                args.push(destination.into());
                args
            }
            Converter::Afconvert(_) => vec![
                "-f".into(),
                "m4af".into(),
                "-d".into(),
                "alac".into(),
                source.into(),
                destination.into(),
            ],
        }
    }
}

/// The tools a batch runs with, resolved once up front and threaded into
/// the batch call, so nothing re-resolves PATH mid-run.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Tool used for the transcode step
    pub converter: Converter,
    /// ffmpeg used for PCM decode during verification, when resolvable
    pub verifier: Option<PathBuf>,
}

impl Toolchain {
    /// Resolve the converter (and the verification decoder) on PATH.
    ///
    /// An explicitly given ffmpeg path is honored only if it resolves.
    /// `prefer_afconvert` selects afconvert when present; otherwise ffmpeg
    /// wins and afconvert is a warned fallback with reduced metadata
    /// fidelity. Neither tool resolving is fatal.
    pub fn detect(prefer_afconvert: bool, ffmpeg_path: Option<&Path>) -> Result<Self, EngineError> {
        let ffmpeg = resolve_ffmpeg(ffmpeg_path);
        let afconvert = which::which("afconvert").ok();

        let converter = if let (true, Some(af)) = (prefer_afconvert, afconvert.as_ref()) {
            Converter::Afconvert(af.clone())
        } else if let Some(ff) = ffmpeg.as_ref() {
            Converter::Ffmpeg(ff.clone())
        } else if let Some(af) = afconvert {
            warn!("ffmpeg not found, using afconvert; metadata and artwork support is limited");
            Converter::Afconvert(af)
        } else {
            return Err(EngineError::ToolNotFound);
        };

        debug!(
            converter = converter.name(),
            program = %converter.program().display(),
            "resolved converter"
        );
        Ok(Toolchain {
            converter,
            verifier: ffmpeg,
        })
    }
}

fn resolve_ffmpeg(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => which::which(path).ok(),
        None => which::which("ffmpeg").ok(),
    }
}

/// Run an external tool to completion, capturing its output.
///
/// Success is exactly a zero exit status; captured stderr becomes the
/// error detail. There are no retries.
pub fn run(program: &Path, args: &[OsString]) -> Result<(), EngineError> {
    debug!(program = %program.display(), ?args, "spawning");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| EngineError::Spawn {
            tool: tool_name(program),
            source,
        })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(process_error(program, output.status.code(), &output.stderr))
    }
}

/// Run an external tool, feeding its stdout into `sink` as it is
/// produced, so arbitrarily large streams never accumulate in memory.
/// stderr is captured for the failure path.
pub fn run_streaming<W: Write>(
    program: &Path,
    args: &[OsString],
    sink: &mut W,
) -> Result<(), EngineError> {
    debug!(program = %program.display(), ?args, "spawning (streaming)");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| EngineError::Spawn {
            tool: tool_name(program),
            source,
        })?;

    // Drain stdout to EOF first; the remaining stderr is collected by
    // wait_with_output below.
    if let Some(mut stdout) = child.stdout.take() {
        let mut buf = vec![0u8; 1024 * 1024];
        loop {
            let n = stdout.read(&mut buf).map_err(|source| EngineError::Pipe {
                tool: tool_name(program),
                source,
            })?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).map_err(|source| EngineError::Pipe {
                tool: tool_name(program),
                source,
            })?;
        }
    }

    let output = child.wait_with_output().map_err(|source| EngineError::Pipe {
        tool: tool_name(program),
        source,
    })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(process_error(program, output.status.code(), &output.stderr))
    }
}

fn process_error(program: &Path, code: Option<i32>, stderr: &[u8]) -> EngineError {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    EngineError::Process {
        tool: tool_name(program),
        // A tool killed by a signal has no exit code.
        code: code.unwrap_or(-1),
        stderr: if stderr.is_empty() {
            "no diagnostic output".to_string()
        } else {
            stderr
        },
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string_lossy().into_owned())
}
