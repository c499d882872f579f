//! Reading produced archives back: entry listing and `.lzma` header decoding.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use serde::Serialize;
use tracing::debug;
use xz2::read::XzDecoder;
use xz2::stream::Stream;

use crate::archive::CompressionKind;
use crate::error::{ArchiveError, Result};

/// Kind of a tar entry in a produced archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
    Other,
}

/// Header fields of one tar entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivedEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mtime: u64,
    pub mode: u32,
}

/// Decoded `.lzma` ("alone") header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaHeader {
    /// `lc/lp/pb` byte followed by the little-endian dictionary size.
    pub properties: [u8; 5],
    /// `None` when the header carries the "unknown size" marker.
    pub uncompressed_size: Option<u64>,
}

impl LzmaHeader {
    pub fn dictionary_size(&self) -> u32 {
        LittleEndian::read_u32(&self.properties[1..])
    }
}

/// Read the 13-byte header at the start of a `.lzma` file.
pub fn read_lzma_header(path: &Path) -> Result<LzmaHeader> {
    let mut file = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
    let mut properties = [0u8; 5];
    file.read_exact(&mut properties)
        .map_err(|e| ArchiveError::io(path, e))?;
    let size = file
        .read_u64::<LittleEndian>()
        .map_err(|e| ArchiveError::io(path, e))?;

    Ok(LzmaHeader {
        properties,
        uncompressed_size: (size != u64::MAX).then_some(size),
    })
}

/// Decode `path` and call `visitor` for every tar entry with a reader over its
/// body. Unread bodies are skipped.
pub fn visit_entries(
    path: &Path,
    kind: CompressionKind,
    visitor: &mut dyn FnMut(&ArchivedEntry, &mut dyn Read) -> Result<()>,
) -> Result<()> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ArchiveError::FileNotFound(path.to_path_buf())
        } else {
            ArchiveError::io(path, e)
        }
    })?;
    let reader = BufReader::new(file);
    debug!(path = %path.display(), codec = kind.name(), "Reading archive");

    match kind {
        CompressionKind::Gzip => walk_tar(GzDecoder::new(reader), path, visitor),
        CompressionKind::Bzip2 => walk_tar(BzDecoder::new(reader), path, visitor),
        CompressionKind::Xz => walk_tar(XzDecoder::new(reader), path, visitor),
        CompressionKind::Lzma => {
            let stream = Stream::new_lzma_decoder(u64::MAX)
                .map_err(|e| ArchiveError::codec("lzma", e))?;
            walk_tar(XzDecoder::new_stream(reader, stream), path, visitor)
        }
    }
}

/// Header listing of every entry, in archive order.
pub fn list_entries(path: &Path, kind: CompressionKind) -> Result<Vec<ArchivedEntry>> {
    let mut entries = Vec::new();
    visit_entries(path, kind, &mut |entry, _| {
        entries.push(entry.clone());
        Ok(())
    })?;
    Ok(entries)
}

fn walk_tar<R: Read>(
    reader: R,
    path: &Path,
    visitor: &mut dyn FnMut(&ArchivedEntry, &mut dyn Read) -> Result<()>,
) -> Result<()> {
    let io_err = |e| ArchiveError::io(path, e);
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        let info = {
            let header = entry.header();
            let entry_type = header.entry_type();
            let kind = if entry_type.is_dir() {
                EntryKind::Directory
            } else if entry_type.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };
            ArchivedEntry {
                path: String::from_utf8_lossy(&entry.path_bytes()).into_owned(),
                kind,
                size: header.size().map_err(io_err)?,
                mtime: header.mtime().map_err(io_err)?,
                mode: header.mode().map_err(io_err)?,
            }
        };
        visitor(&info, &mut entry)?;
    }
    Ok(())
}
