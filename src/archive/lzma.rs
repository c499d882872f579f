//! LZMA ("alone") backend.
//!
//! The `.lzma` header stores the uncompressed length, so the tar is staged in
//! a temp file and measured before encoding. Output layout:
//! `[5 property bytes][u64 LE uncompressed size][payload]`.
//!
//! liblzma's alone encoder always writes the "unknown size" marker; the real
//! length is written over it once the payload is complete.

use std::io::{self, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::debug;
use xz2::stream::{LzmaOptions, Stream};
use xz2::write::XzEncoder;

use crate::archive::staging::{into_output_file, stage_tar, OutputGuard};
use crate::archive::{ArchiveReport, CompressionKind, Compressor, ProduceTar};
use crate::error::{ArchiveError, Result};

/// Preset level for the LZMA1 encoder.
pub const LZMA_PRESET: u32 = 9;

/// Offset of the uncompressed-size field, right after the property bytes.
pub const LZMA_SIZE_OFFSET: u64 = 5;

#[derive(Debug, Clone)]
pub struct LzmaCompressor {
    temp_dir: PathBuf,
}

impl LzmaCompressor {
    pub fn new(temp_dir: PathBuf) -> Self {
        Self { temp_dir }
    }
}

fn new_stream() -> std::result::Result<Stream, xz2::stream::Error> {
    let options = LzmaOptions::new_preset(LZMA_PRESET)?;
    Stream::new_lzma_encoder(&options)
}

/// Overwrite the header's size field with `len`, leaving the cursor at the end.
pub(crate) fn write_declared_size<W: Write + Seek>(out: &mut W, len: u64) -> io::Result<()> {
    out.seek(SeekFrom::Start(LZMA_SIZE_OFFSET))?;
    out.write_u64::<LittleEndian>(len)?;
    out.seek(SeekFrom::End(0))?;
    Ok(())
}

impl Compressor for LzmaCompressor {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Lzma
    }

    fn write_archive(&self, output: &Path, produce: ProduceTar<'_>) -> Result<ArchiveReport> {
        let (guard, file) = OutputGuard::create(output)?;
        let mut staged = stage_tar(&self.temp_dir, produce)?;

        debug!(
            path = %output.display(),
            stage = %staged.stage.path().display(),
            bytes = staged.len,
            "Encoding lzma archive"
        );
        let stream = new_stream().map_err(|e| ArchiveError::codec("lzma", e))?;
        let mut encoder = XzEncoder::new_stream(BufWriter::new(file), stream);
        io::copy(&mut BufReader::new(&mut staged.file), &mut encoder)
            .map_err(|e| ArchiveError::io(output, e))?;
        let sink = encoder.finish().map_err(|e| ArchiveError::io(output, e))?;

        let mut file = into_output_file(sink, output)?;
        write_declared_size(&mut file, staged.len).map_err(|e| ArchiveError::io(output, e))?;
        file.sync_all().map_err(|e| ArchiveError::io(output, e))?;

        guard.commit();
        Ok(staged.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_declared_size_replaces_unknown_marker() {
        let mut header: Vec<u8> = vec![0x5D, 0, 0, 0, 4];
        header.extend_from_slice(&[0xFF; 8]);
        header.extend_from_slice(b"payload");

        let mut out = Cursor::new(header);
        write_declared_size(&mut out, 0x0102_0304).unwrap();

        let bytes = out.get_ref();
        assert_eq!(&bytes[5..13], &[4, 3, 2, 1, 0, 0, 0, 0]);
        assert_eq!(&bytes[13..], b"payload");
        assert_eq!(out.position(), bytes.len() as u64);
    }

    #[test]
    fn test_encoder_builds_at_preset() {
        assert!(new_stream().is_ok());
    }
}
