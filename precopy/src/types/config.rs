use std::{os::fd::RawFd, path::PathBuf};

use nix::unistd::Pid;

/// What to migrate and where snapshots go. Fixed for one migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Root of the process tree to migrate.
    pub pid: Pid,

    /// Socket connected to the remote page server.
    pub page_server_fd: RawFd,

    /// Directory under which the per-iteration snapshot directories live.
    pub work_dir: PathBuf,
}

impl MigrationConfig {
    pub fn new(pid: Pid, page_server_fd: RawFd, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            page_server_fd,
            work_dir: work_dir.into(),
        }
    }
}
