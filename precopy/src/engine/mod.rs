pub mod criu;

use std::{os::fd::RawFd, path::Path};

use nix::unistd::Pid;

use crate::{
    error::Result,
    types::{cancellation::CancellationToken, config::MigrationConfig, dump_stats::DumpStats},
};

/// Parameters of one snapshot operation.
#[derive(Debug, Clone, Copy)]
pub struct DumpRequest<'a> {
    pub pid: Pid,

    /// Directory the images are written to.
    pub images_dir: &'a Path,

    /// Open descriptor of `images_dir`, if the caller holds one. Engines
    /// prefer it over the path.
    pub images_dir_fd: Option<RawFd>,

    /// Previous snapshot to diff against. `None` for a full snapshot.
    pub parent: Option<&'a Path>,

    /// Socket connected to the remote page server.
    pub page_server_fd: RawFd,

    pub cancellation: &'a CancellationToken,
}

/// The checkpoint/restore engine the migration is driven with.
pub trait CheckpointEngine {
    /// Acquires engine resources. Paired with exactly one `cleanup` on
    /// every exit path once it has succeeded.
    fn prepare(&mut self, config: &MigrationConfig) -> Result<()>;

    fn cleanup(&mut self);

    /// Takes an incremental snapshot while the process keeps running.
    fn pre_dump(&mut self, request: &DumpRequest) -> Result<()>;

    /// Takes the final snapshot. The process is stopped afterwards.
    fn dump(&mut self, request: &DumpRequest) -> Result<()>;

    /// Reads back the statistics of the snapshot written into `images_dir`.
    fn dump_stats(&self, images_dir: &Path) -> Result<DumpStats>;
}
