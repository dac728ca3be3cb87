use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use engine_logging::engine_debug;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("directory missing or not writable: {0}")]
    Directory(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure a directory exists; create if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::Directory(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
    }
    // Basic writability probe: try creating a temp file.
    NamedTempFile::new_in(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
    Ok(())
}

/// Writes files into one directory by writing a temp file then renaming, so
/// readers never observe a partially written file.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_dir(&self.dir)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content)?;
        self.commit(tmp, filename)
    }

    /// Copy `source` into the directory under `filename`.
    pub fn copy_from(&self, filename: &str, source: &Path) -> Result<PathBuf, PersistError> {
        ensure_dir(&self.dir)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        let mut input = File::open(source)?;
        io::copy(&mut input, tmp.as_file_mut())?;
        self.commit(tmp, filename)
    }

    fn commit(&self, mut tmp: NamedTempFile, filename: &str) -> Result<PathBuf, PersistError> {
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        let target = self.dir.join(filename);
        // Replace existing file if present.
        if target.exists() {
            fs::remove_file(&target)?;
        }
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

/// Move a finished file to its destination: delete-if-exists, then rename.
///
/// Falls back to an atomic copy when the rename crosses filesystems.
pub fn move_into_place(source: &Path, destination: &Path) -> Result<(), PersistError> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    if destination.exists() {
        fs::remove_file(destination)?;
    }

    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(err) => {
            engine_debug!(
                "rename {:?} -> {:?} failed ({}), copying instead",
                source,
                destination,
                err
            );
            let filename = destination
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    PersistError::Directory(format!("invalid destination {}", destination.display()))
                })?;
            AtomicFileWriter::new(parent.to_path_buf()).copy_from(filename, source)?;
            fs::remove_file(source)?;
            Ok(())
        }
    }
}
