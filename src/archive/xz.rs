//! XZ backend: tar staged in a temp file, then encoded at preset 9.

use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::debug;
use xz2::stream::{Check, Stream};
use xz2::write::XzEncoder;

use crate::archive::staging::{close_output, stage_tar, OutputGuard};
use crate::archive::{ArchiveReport, CompressionKind, Compressor, ProduceTar};
use crate::error::{ArchiveError, Result};

/// Preset level, without the "extreme" flag.
pub const XZ_PRESET: u32 = 9;

/// Result of [`initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    Initialized,
    AlreadyInitialized,
}

static CODEC_PROBE: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// One-time check that liblzma can build an encoder for [`XZ_PRESET`].
///
/// Safe to call any number of times from any thread; only the first call does
/// work, later calls report [`InitStatus::AlreadyInitialized`] (or the same
/// failure).
pub fn initialize() -> Result<InitStatus> {
    let mut probed = false;
    let outcome = CODEC_PROBE.get_or_init(|| {
        probed = true;
        new_stream().map(drop).map_err(|e| e.to_string())
    });

    match outcome {
        Ok(()) if probed => {
            debug!(preset = XZ_PRESET, "XZ codec initialized");
            Ok(InitStatus::Initialized)
        }
        Ok(()) => Ok(InitStatus::AlreadyInitialized),
        Err(reason) => Err(ArchiveError::codec("xz", reason)),
    }
}

fn new_stream() -> std::result::Result<Stream, xz2::stream::Error> {
    Stream::new_easy_encoder(XZ_PRESET, Check::Crc64)
}

#[derive(Debug, Clone)]
pub struct XzCompressor {
    temp_dir: PathBuf,
}

impl XzCompressor {
    pub fn new(temp_dir: PathBuf) -> Self {
        Self { temp_dir }
    }
}

impl Compressor for XzCompressor {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Xz
    }

    fn write_archive(&self, output: &Path, produce: ProduceTar<'_>) -> Result<ArchiveReport> {
        initialize()?;
        let (guard, file) = OutputGuard::create(output)?;
        let mut staged = stage_tar(&self.temp_dir, produce)?;

        debug!(
            path = %output.display(),
            stage = %staged.stage.path().display(),
            bytes = staged.len,
            "Encoding xz archive"
        );
        let stream = new_stream().map_err(|e| ArchiveError::codec("xz", e))?;
        let mut encoder = XzEncoder::new_stream(BufWriter::new(file), stream);
        io::copy(&mut BufReader::new(&mut staged.file), &mut encoder)
            .map_err(|e| ArchiveError::io(output, e))?;
        let sink = encoder.finish().map_err(|e| ArchiveError::io(output, e))?;
        close_output(sink, output)?;

        guard.commit();
        Ok(staged.report)
    }
}
