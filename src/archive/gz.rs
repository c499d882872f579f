//! Gzip backend: single pass, maximum compression level.

use std::io::BufWriter;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::archive::staging::{close_output, OutputGuard};
use crate::archive::{ArchiveReport, CompressionKind, Compressor, ProduceTar};
use crate::error::{ArchiveError, Result};

const GZIP_LEVEL: u32 = 9;

#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Gzip
    }

    fn write_archive(&self, output: &Path, produce: ProduceTar<'_>) -> Result<ArchiveReport> {
        let (guard, file) = OutputGuard::create(output)?;
        debug!(path = %output.display(), level = GZIP_LEVEL, "Writing gzip archive");

        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::new(GZIP_LEVEL));
        let report = produce(&mut encoder).map_err(|e| ArchiveError::io(output, e))?;
        let sink = encoder.finish().map_err(|e| ArchiveError::io(output, e))?;
        close_output(sink, output)?;

        guard.commit();
        Ok(report)
    }
}
