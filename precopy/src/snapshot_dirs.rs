use std::{
    fs::{self, File},
    os::fd::{AsRawFd, RawFd},
    path::{Path, PathBuf},
};

use log::debug;

use crate::error::Result;

/// An opened snapshot directory. Dropping it closes the directory
/// descriptor; the path stays usable as a parent reference.
#[derive(Debug)]
pub struct SnapshotDir {
    path: PathBuf,
    file: File,
}

impl SnapshotDir {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRawFd for SnapshotDir {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Append-only series of snapshot directories `<root>/0`, `<root>/1`, ...
#[derive(Debug)]
pub struct SnapshotDirSequence {
    root: PathBuf,
    next_index: usize,
}

impl SnapshotDirSequence {
    /// Uses `root` for snapshot storage, creating it if necessary. The root
    /// is made absolute so that parent references resolve from anywhere.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        let root = fs::canonicalize(root.as_ref())?;

        Ok(Self {
            root,
            next_index: 0,
        })
    }

    fn path_of(&self, index: usize) -> PathBuf {
        self.root.join(index.to_string())
    }

    /// Creates and opens the next directory of the sequence.
    pub fn open_next(&mut self) -> Result<SnapshotDir> {
        let path = self.path_of(self.next_index);

        fs::create_dir(&path)?;
        let file = File::open(&path)?;

        self.next_index += 1;
        debug!("Opened snapshot directory {}", path.display());

        Ok(SnapshotDir { path, file })
    }

    /// Path of the most recently opened directory, `None` before the first
    /// `open_next`.
    pub fn last_path(&self) -> Option<PathBuf> {
        self.next_index
            .checked_sub(1)
            .map(|index| self.path_of(index))
    }
}
