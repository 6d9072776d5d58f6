//! Lossless round-trip verification.
//!
//! This module provides:
//! - Digest algorithms (MD5, SHA-256, BLAKE3) and computed digest values
//! - A streaming hasher usable as the sink for piped PCM output
//! - Decode-and-digest of a file's first audio stream via ffmpeg
//! - The round-trip check that certifies a conversion as lossless
//!
//! Both sides are decoded to a canonical raw form (first audio stream,
//! signed 32-bit little-endian interleaved samples) and digested while
//! the decoder is still producing output; equal digests certify that the
//! conversion lost nothing.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

use crate::error::EngineError;
use crate::tools;

/// Digest algorithms available for PCM comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// MD5 (fast; adequate for content comparison)
    Md5,
    /// SHA-256
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    Blake3,
}

impl Default for ChecksumAlgorithm {
    fn default() -> Self {
        ChecksumAlgorithm::Md5
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!("unknown digest algorithm: {other}")),
        }
    }
}

/// A computed digest, tagged with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Incremental hasher that doubles as the `Write` sink for streamed PCM.
pub struct StreamingHasher {
    inner: HasherKind,
}

enum HasherKind {
    Md5(md5::Context),
    Sha256(sha2::Sha256),
    Blake3(blake3::Hasher),
}

impl StreamingHasher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        let inner = match algorithm {
            ChecksumAlgorithm::Md5 => HasherKind::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha256 => HasherKind::Sha256(sha2::Sha256::default()),
            ChecksumAlgorithm::Blake3 => HasherKind::Blake3(blake3::Hasher::new()),
        };
        StreamingHasher { inner }
    }

    /// Feed more data into the digest.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            HasherKind::Md5(context) => context.consume(data),
            HasherKind::Sha256(hasher) => {
                use sha2::Digest;
                hasher.update(data);
            }
            HasherKind::Blake3(hasher) => {
                hasher.update(data);
            }
        }
    }

    /// Finish and return the digest value.
    pub fn finalize(self) -> ChecksumValue {
        match self.inner {
            HasherKind::Md5(context) => ChecksumValue {
                algorithm: ChecksumAlgorithm::Md5,
                hex: format!("{:x}", context.compute()),
            },
            HasherKind::Sha256(hasher) => {
                use sha2::Digest;
                ChecksumValue {
                    algorithm: ChecksumAlgorithm::Sha256,
                    hex: format!("{:x}", hasher.finalize()),
                }
            }
            HasherKind::Blake3(hasher) => ChecksumValue {
                algorithm: ChecksumAlgorithm::Blake3,
                hex: hasher.finalize().to_hex().to_string(),
            },
        }
    }
}

impl io::Write for StreamingHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// ffmpeg argument contract for decoding the first audio stream to raw
/// signed 32-bit little-endian samples on stdout.
fn decode_args(path: &Path) -> Vec<OsString> {
    vec![
        "-v".into(),
        "error".into(),
        "-i".into(),
        path.into(),
        "-map".into(),
        "0:a:0".into(),
        "-f".into(),
        "s32le".into(),
        "-".into(),
    ]
}

/// Decode `path` with `ffmpeg` and return the digest of its raw samples.
pub fn pcm_digest(
    ffmpeg: &Path,
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<ChecksumValue, EngineError> {
    let mut hasher = StreamingHasher::new(algorithm);
    tools::run_streaming(ffmpeg, &decode_args(path), &mut hasher)?;
    Ok(hasher.finalize())
}

/// Certify that `destination` decodes to exactly the samples of `source`.
///
/// On mismatch the destination is removed before the error is reported,
/// so an unverified artifact never survives on disk.
pub fn verify_round_trip(
    ffmpeg: &Path,
    source: &Path,
    destination: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<(), EngineError> {
    let src_digest = pcm_digest(ffmpeg, source, algorithm)?;
    let dst_digest = pcm_digest(ffmpeg, destination, algorithm)?;
    if src_digest == dst_digest {
        return Ok(());
    }

    if let Err(err) = std::fs::remove_file(destination) {
        warn!(path = %destination.display(), "could not remove mismatched output: {err}");
    }
    Err(EngineError::VerifyMismatch {
        original: source.to_path_buf(),
        converted: destination.to_path_buf(),
    })
}
