//! Compressed tar archives of thread groups.
//!
//! A [`Compressor`] owns the output file and decides how tar bytes reach the
//! encoder: gzip and bzip2 encode in a single pass, XZ and LZMA stage the tar
//! in a secure temp file first because their encoders want the finished input.

pub mod bz2;
pub mod gz;
pub mod inspect;
pub mod lzma;
pub mod report;
pub mod staging;
pub mod tar_writer;
pub mod xz;

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ArchiveError, Result};
use crate::model::message::{MessageBlob, MessageSummary};
use crate::model::thread::Threads;
use crate::source::MessageFetcher;

pub use report::{ArchiveReport, FailureStage, MessageOutcome};
pub use tar_writer::TarWriter;

/// Default per-message threshold (MiB) above which the sink is flushed eagerly.
pub const DEFAULT_MAX_MESSAGE_SIZE_MB: u32 = 10;

/// Writes a complete tar stream into the sink provided by a backend.
pub type ProduceTar<'a> = Box<dyn FnOnce(&mut dyn Write) -> io::Result<ArchiveReport> + 'a>;

/// Supported compression formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    Lzma,
    Gzip,
    Bzip2,
    Xz,
}

/// Selector strings accepted from configuration, lowercased.
const SELECTORS: &[(&str, CompressionKind)] = &[
    ("lzma", CompressionKind::Lzma),
    ("gzip", CompressionKind::Gzip),
    ("gz", CompressionKind::Gzip),
    ("bzip2", CompressionKind::Bzip2),
    ("bz2", CompressionKind::Bzip2),
    ("xz", CompressionKind::Xz),
];

impl CompressionKind {
    pub const ALL: [Self; 4] = [Self::Lzma, Self::Gzip, Self::Bzip2, Self::Xz];

    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Lzma => "tar.lzma",
            Self::Gzip => "tar.gz",
            Self::Bzip2 => "tar.bz2",
            Self::Xz => "tar.xz",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Lzma => "lzma",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
        }
    }

    /// Exact lookup of a selector, ignoring case and surrounding whitespace.
    pub fn parse_selector(selector: &str) -> Option<Self> {
        let key = selector.trim().to_lowercase();
        SELECTORS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, kind)| *kind)
    }

    /// Resolve a configured selector. Unknown values fall back to LZMA.
    pub fn from_selector(selector: &str) -> Self {
        Self::parse_selector(selector).unwrap_or_else(|| {
            warn!(
                selector,
                fallback = Self::Lzma.name(),
                "Unknown compression type, using default"
            );
            Self::Lzma
        })
    }

    /// Detect the format of an existing archive from its file name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Self::ALL
            .into_iter()
            .find(|kind| name.ends_with(&format!(".{}", kind.extension())))
            .ok_or_else(|| ArchiveError::UnsupportedArchive(path.to_path_buf()))
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings shared by all backends.
#[derive(Debug, Clone)]
pub struct CompressorOptions {
    /// Directory for staging files (XZ and LZMA).
    pub temp_dir: PathBuf,
}

impl Default for CompressorOptions {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// A compression backend.
///
/// Implementors only decide how the tar stream is staged and encoded;
/// [`Compressor::compress`] and [`Compressor::compress_streaming`] are shared.
/// On any error the output file is removed and no staging file is left behind.
pub trait Compressor: Send + Sync {
    fn kind(&self) -> CompressionKind;

    /// Create `output`, run `produce` against the backend's tar sink, and
    /// finish encoding.
    fn write_archive(&self, output: &Path, produce: ProduceTar<'_>) -> Result<ArchiveReport>;

    /// Archive fully materialized thread groups.
    fn compress(&self, output: &Path, threads: Threads<MessageBlob>) -> Result<ArchiveReport> {
        let started = Instant::now();
        let report = self.write_archive(
            output,
            Box::new(move |sink: &mut dyn Write| -> io::Result<ArchiveReport> {
                let mut writer = TarWriter::new(sink);
                let report = writer.write_threads(threads)?;
                writer.finish()?;
                Ok(report)
            }),
        )?;
        log_completion(self.kind(), output, &report, started);
        Ok(report)
    }

    /// Archive thread groups, fetching each message only when it is written.
    fn compress_streaming(
        &self,
        output: &Path,
        threads: &Threads<MessageSummary>,
        fetcher: &mut dyn MessageFetcher,
        max_message_size_mb: u32,
    ) -> Result<ArchiveReport> {
        let started = Instant::now();
        let report = self.write_archive(
            output,
            Box::new(move |sink: &mut dyn Write| -> io::Result<ArchiveReport> {
                let mut writer = TarWriter::new(sink);
                let report =
                    writer.write_threads_streaming(threads, fetcher, max_message_size_mb)?;
                writer.finish()?;
                Ok(report)
            }),
        )?;
        log_completion(self.kind(), output, &report, started);
        Ok(report)
    }
}

/// Build the backend for `kind`.
pub fn compressor_for(kind: CompressionKind, options: &CompressorOptions) -> Box<dyn Compressor> {
    match kind {
        CompressionKind::Lzma => Box::new(lzma::LzmaCompressor::new(options.temp_dir.clone())),
        CompressionKind::Gzip => Box::new(gz::GzipCompressor),
        CompressionKind::Bzip2 => Box::new(bz2::Bzip2Compressor),
        CompressionKind::Xz => Box::new(xz::XzCompressor::new(options.temp_dir.clone())),
    }
}

fn log_completion(kind: CompressionKind, output: &Path, report: &ArchiveReport, started: Instant) {
    let failures = report.outcomes.len() - report.written_count();
    info!(
        codec = kind.name(),
        path = %output.display(),
        threads = report.threads_written,
        messages = report.written_count(),
        failures,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Archive complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_lookup() {
        assert_eq!(CompressionKind::from_selector("GZIP"), CompressionKind::Gzip);
        assert_eq!(CompressionKind::from_selector(" bz2 "), CompressionKind::Bzip2);
        assert_eq!(CompressionKind::from_selector("xz"), CompressionKind::Xz);
        assert_eq!(CompressionKind::from_selector("Lzma"), CompressionKind::Lzma);
    }

    #[test]
    fn test_unknown_selector_falls_back_to_lzma() {
        assert_eq!(CompressionKind::from_selector("zstd"), CompressionKind::Lzma);
        assert_eq!(CompressionKind::from_selector(""), CompressionKind::Lzma);
        assert_eq!(CompressionKind::parse_selector("zstd"), None);
    }

    #[test]
    fn test_from_path() {
        let kind = CompressionKind::from_path(Path::new("/tmp/Mail.TAR.GZ")).unwrap();
        assert_eq!(kind, CompressionKind::Gzip);
        for kind in CompressionKind::ALL {
            let path = PathBuf::from(format!("archive.{}", kind.extension()));
            assert_eq!(CompressionKind::from_path(&path).unwrap(), kind);
        }
        assert!(matches!(
            CompressionKind::from_path(Path::new("mail.zip")),
            Err(ArchiveError::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn test_backend_kinds() {
        let options = CompressorOptions::default();
        for kind in CompressionKind::ALL {
            assert_eq!(compressor_for(kind, &options).kind(), kind);
        }
    }
}
