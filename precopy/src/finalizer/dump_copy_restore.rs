use std::{fs, os::fd::AsRawFd, path::Path};

use log::info;

use super::LocalFinalizer;
use crate::{
    engine::{CheckpointEngine, DumpRequest},
    error::Result,
    helpers::command,
    types::{cancellation::CancellationToken, config::MigrationConfig},
};

pub const FINAL_IMAGES_DIR: &str = "final";

/// Takes the final dump into `<work_dir>/final`, then hands the images to a
/// restore command that copies them over and resumes the process on the
/// target.
///
/// The restore command sees `PRECOPY_IMAGES_DIR`, `PRECOPY_PID` and, when a
/// pre-copy snapshot exists, `PRECOPY_PARENT_DIR`.
#[derive(Debug, Clone)]
pub struct DumpCopyRestore {
    restore_cmd: String,
    cancellation: CancellationToken,
}

impl DumpCopyRestore {
    pub fn new(restore_cmd: impl Into<String>) -> Self {
        Self {
            restore_cmd: restore_cmd.into(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl LocalFinalizer for DumpCopyRestore {
    fn finalize(
        &mut self,
        engine: &mut dyn CheckpointEngine,
        config: &MigrationConfig,
        parent: Option<&Path>,
    ) -> Result<()> {
        fs::create_dir_all(&config.work_dir)?;
        let images_dir = fs::canonicalize(&config.work_dir)?.join(FINAL_IMAGES_DIR);
        fs::create_dir(&images_dir)?;
        let dir = fs::File::open(&images_dir)?;

        info!("Final dump into {}", images_dir.display());
        let dumped = engine.dump(&DumpRequest {
            pid: config.pid,
            images_dir: &images_dir,
            images_dir_fd: Some(dir.as_raw_fd()),
            parent,
            page_server_fd: config.page_server_fd,
            cancellation: &self.cancellation,
        });
        drop(dir);
        dumped?;

        info!("Restoring on the target");
        let mut cmd = command::shell(&self.restore_cmd);
        cmd.env("PRECOPY_IMAGES_DIR", &images_dir)
            .env("PRECOPY_PID", config.pid.as_raw().to_string());
        if let Some(parent) = parent {
            cmd.env("PRECOPY_PARENT_DIR", parent);
        }

        command::run(&mut cmd)
    }
}
