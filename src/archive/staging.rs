//! Output and temp-file guards shared by the compressor backends.
//!
//! Both guards clean up on drop, so every early return and panic path removes
//! what it must.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::archive::{ArchiveReport, ProduceTar};
use crate::error::{ArchiveError, Result};
use crate::securefs::{create_secure_temp_file, safe_delete_file};

/// Prefix of every staging file this crate creates.
pub const TEMP_PREFIX: &str = "gmail-archive-";

/// Extension of staged, uncompressed tar data.
pub const TEMP_EXTENSION: &str = ".tar";

/// Owns a freshly created output file until the archive is complete.
///
/// Dropping an uncommitted guard deletes the partial output.
#[derive(Debug)]
pub struct OutputGuard {
    path: PathBuf,
    committed: bool,
}

impl OutputGuard {
    /// Create (or truncate) `path` and arm the guard.
    pub fn create(path: &Path) -> Result<(Self, File)> {
        let file = File::create(path).map_err(|e| ArchiveError::io(path, e))?;
        let guard = Self {
            path: path.to_path_buf(),
            committed: false,
        };
        Ok((guard, file))
    }

    /// Keep the output: the archive was written successfully.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        debug!(path = %self.path.display(), "Removing partial archive");
        if !safe_delete_file(&self.path) {
            warn!(
                path = %self.path.display(),
                "Partial archive could not be removed"
            );
        }
    }
}

/// A secure temp file holding staged tar data; always deleted on drop.
///
/// The handle is returned separately so callers can close it before the
/// guard removes the file.
#[derive(Debug)]
pub struct TempStage {
    path: PathBuf,
}

impl TempStage {
    pub fn create(dir: &Path) -> Result<(Self, File)> {
        let (file, path) = create_secure_temp_file(dir, TEMP_PREFIX, TEMP_EXTENSION)?;
        Ok((Self { path }, file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewind `file` for the second pass and return the staged length.
    pub fn rewind(&self, file: &mut File) -> Result<u64> {
        let len = file
            .seek(SeekFrom::End(0))
            .map_err(|e| ArchiveError::io(&self.path, e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| ArchiveError::io(&self.path, e))?;
        Ok(len)
    }
}

impl Drop for TempStage {
    fn drop(&mut self) {
        safe_delete_file(&self.path);
    }
}

/// A fully written, rewound tar staging file.
///
/// `file` is declared before `stage` so the handle closes before the file is
/// deleted.
pub(crate) struct StagedTar {
    pub file: File,
    pub stage: TempStage,
    pub len: u64,
    pub report: ArchiveReport,
}

/// First pass of the two-pass backends: write the whole tar into a secure
/// temp file under `dir` and rewind it.
pub(crate) fn stage_tar(dir: &Path, produce: ProduceTar<'_>) -> Result<StagedTar> {
    let (stage, mut file) = TempStage::create(dir)?;

    let report = {
        let mut sink = BufWriter::new(&mut file);
        let report = produce(&mut sink).map_err(|e| ArchiveError::io(stage.path(), e))?;
        sink.flush().map_err(|e| ArchiveError::io(stage.path(), e))?;
        report
    };

    let len = stage.rewind(&mut file)?;
    debug!(path = %stage.path().display(), bytes = len, "Staged tar data");
    Ok(StagedTar {
        file,
        stage,
        len,
        report,
    })
}

/// Flush the buffered output and take back the file handle.
pub(crate) fn into_output_file(sink: BufWriter<File>, path: &Path) -> Result<File> {
    sink.into_inner()
        .map_err(|e| ArchiveError::io(path, e.into_error()))
}

/// Flush the buffered output and push it to disk.
pub(crate) fn close_output(sink: BufWriter<File>, path: &Path) -> Result<()> {
    let file = into_output_file(sink, path)?;
    file.sync_all().map_err(|e| ArchiveError::io(path, e))
}
