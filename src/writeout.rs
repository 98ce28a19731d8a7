//! Atomic output writes: sibling temporary plus rename.
//!
//! The temporary is created in the destination directory so the final
//! rename never crosses a filesystem boundary. Dropping an uncommitted
//! handle removes the temporary, so no partial output is ever visible; a
//! rename onto an existing symlink replaces the link itself rather than
//! writing through it. File mode is whatever a newly created file gets.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// An output file that only appears at its destination on [`commit`].
///
/// [`commit`]: AtomicFile::commit
pub struct AtomicFile {
    temp: NamedTempFile,
    dest: PathBuf,
}

impl AtomicFile {
    /// Create the destination's parent directories and a sibling temporary.
    pub fn create(dest: &Path) -> io::Result<Self> {
        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        Ok(AtomicFile { temp: NamedTempFile::new_in(parent)?, dest: dest.to_path_buf() })
    }

    /// Handle for streaming writers that need `Write + Seek`.
    pub fn file(&self) -> &File {
        self.temp.as_file()
    }

    /// Flush and rename over the destination.
    pub fn commit(mut self) -> io::Result<()> {
        self.temp.flush()?;
        self.temp.persist(&self.dest).map(|_| ()).map_err(|err| err.error)
    }
}

/// Write `bytes` to `dest` atomically.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let out = AtomicFile::create(dest)?;
    let mut file = out.file();
    file.write_all(bytes)?;
    out.commit()
}

/// Stream a raw copy of `src` to `dest` atomically.
pub fn copy_atomic(src: &Path, dest: &Path) -> io::Result<u64> {
    let out = AtomicFile::create(dest)?;
    let mut reader = File::open(src)?;
    let mut writer = out.file();
    let copied = io::copy(&mut reader, &mut writer)?;
    out.commit()?;
    Ok(copied)
}
