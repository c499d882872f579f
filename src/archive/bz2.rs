//! Bzip2 backend: single pass, 900k blocks.

use std::io::BufWriter;
use std::path::Path;

use bzip2::write::BzEncoder;
use bzip2::Compression;
use tracing::debug;

use crate::archive::staging::{close_output, OutputGuard};
use crate::archive::{ArchiveReport, CompressionKind, Compressor, ProduceTar};
use crate::error::{ArchiveError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct Bzip2Compressor;

impl Compressor for Bzip2Compressor {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Bzip2
    }

    fn write_archive(&self, output: &Path, produce: ProduceTar<'_>) -> Result<ArchiveReport> {
        let (guard, file) = OutputGuard::create(output)?;
        debug!(path = %output.display(), "Writing bzip2 archive");

        let mut encoder = BzEncoder::new(BufWriter::new(file), Compression::best());
        let report = produce(&mut encoder).map_err(|e| ArchiveError::io(output, e))?;
        let sink = encoder.finish().map_err(|e| ArchiveError::io(output, e))?;
        close_output(sink, output)?;

        guard.commit();
        Ok(report)
    }
}
