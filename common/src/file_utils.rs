//! File helpers for outputs that must never be observed half-written.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Temporary sibling path used while `path` is being written.
///
/// Lives in the same directory so the final rename stays on one filesystem.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
}

/// A file that becomes visible at its destination only after [`AtomicFile::commit`].
///
/// Dropping without committing removes the temporary file.
#[derive(Debug)]
pub struct AtomicFile {
    destination: PathBuf,
    temp_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AtomicFile {
    pub fn create(destination: &Path) -> io::Result<Self> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp_path = temp_path_for(destination);
        let file = File::create(&temp_path)?;
        Ok(Self {
            destination: destination.to_path_buf(),
            temp_path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Flush, sync and move the file into place.
    pub fn commit(mut self) -> io::Result<PathBuf> {
        let Some(writer) = self.writer.take() else {
            return Err(io::Error::other("atomic file already committed"));
        };
        let result = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .and_then(|file| file.sync_all())
            .and_then(|()| fs::rename(&self.temp_path, &self.destination));
        if let Err(e) = result {
            let _ = fs::remove_file(&self.temp_path);
            return Err(e);
        }
        Ok(self.destination.clone())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(io::Error::other("atomic file already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// Write `contents` to `path` through a temporary file and a rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<PathBuf> {
    let mut file = AtomicFile::create(path)?;
    file.write_all(contents)?;
    file.commit()
}
