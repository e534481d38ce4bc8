use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("directory missing or not writable: {0}")]
    Dir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure `dir` exists and is a writable directory; create it if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::Dir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::Dir(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::Dir(e.to_string()))?;
    }
    Ok(())
}

/// Writes whole files under one directory via temp file + rename, so a
/// reader sees either the previous content or the new content, never a mix.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, filename: &str, content: &str) -> Result<PathBuf, PersistError> {
        self.stage(filename, content)?.commit()
    }

    /// Like [`write`](Self::write), but first copies any existing target to
    /// `<filename>.backup`.
    pub fn write_with_backup(&self, filename: &str, content: &str) -> Result<PathBuf, PersistError> {
        let staged = self.stage(filename, content)?;
        if staged.target.exists() {
            let backup = self.dir.join(format!("{filename}.backup"));
            fs::copy(&staged.target, backup)?;
        }
        staged.commit()
    }

    /// Writes and syncs the temp file without replacing the target yet.
    /// Dropping the returned value discards the temp file.
    pub fn stage(&self, filename: &str, content: &str) -> Result<StagedWrite, PersistError> {
        ensure_dir(&self.dir)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        Ok(StagedWrite {
            tmp,
            target: self.dir.join(filename),
        })
    }
}

/// A fully written temp file waiting to be renamed over its target.
#[derive(Debug)]
pub struct StagedWrite {
    tmp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        self.tmp.path()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn commit(self) -> Result<PathBuf, PersistError> {
        self.tmp
            .persist(&self.target)
            .map_err(|e| PersistError::Io(e.error))?;
        Ok(self.target)
    }
}
