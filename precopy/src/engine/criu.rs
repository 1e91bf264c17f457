use std::{
    ffi::OsString,
    os::fd::RawFd,
    path::{Path, PathBuf},
    process::Command,
};

use log::{info, warn};
use nix::{
    fcntl::{fcntl, FcntlArg, FdFlag},
    sys::signal::kill,
};
use path_macro::path;
use serde::{Deserialize, Serialize};

use super::{CheckpointEngine, DumpRequest};
use crate::{
    error::{Error, Result},
    helpers::command,
    types::{config::MigrationConfig, dump_stats::DumpStats},
};

pub const STATS_DUMP_FILE: &str = "stats-dump";
pub const PRE_DUMP_LOG_FILE: &str = "pre-dump.log";
pub const DUMP_LOG_FILE: &str = "dump.log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriuOptions {
    /// Path to the `criu` binary
    pub criu_bin: PathBuf,

    /// Path to the `crit` binary used to decode statistics images
    pub crit_bin: PathBuf,

    /// Verbosity of the per-iteration engine logs (0-4)
    pub log_level: u8,

    /// Extra arguments appended to every dump invocation
    pub extra_args: Vec<String>,
}

impl Default for CriuOptions {
    fn default() -> Self {
        Self {
            criu_bin: PathBuf::from("criu"),
            crit_bin: PathBuf::from("crit"),
            log_level: 4,
            extra_args: Vec::new(),
        }
    }
}

/// Drives the `criu` command line tool.
#[derive(Debug)]
pub struct CriuEngine {
    options: CriuOptions,
    prepared: bool,
    /// Page server fd and the descriptor flags it had before `prepare`.
    saved_fd_flags: Option<(RawFd, FdFlag)>,
}

impl CriuEngine {
    pub fn new(options: CriuOptions) -> Self {
        Self {
            options,
            prepared: false,
            saved_fd_flags: None,
        }
    }

    fn dump_args(&self, action: &str, log_file: &str, request: &DumpRequest) -> Vec<OsString> {
        let images_dir: OsString = match request.images_dir_fd {
            Some(fd) => format!("/proc/self/fd/{}", fd).into(),
            None => request.images_dir.into(),
        };

        let mut args: Vec<OsString> = vec![
            action.into(),
            "--tree".into(),
            request.pid.as_raw().to_string().into(),
            "--images-dir".into(),
            images_dir,
        ];

        if let Some(parent) = request.parent {
            args.push("--prev-images-dir".into());
            args.push(parent.into());
        }

        args.extend([
            "--track-mem".into(),
            "--page-server".into(),
            "--ps-socket".into(),
            request.page_server_fd.to_string().into(),
            "--log-file".into(),
            log_file.into(),
            format!("-v{}", self.options.log_level).into(),
        ]);

        args.extend(self.options.extra_args.iter().map(OsString::from));

        args
    }

    fn run_dump(&mut self, action: &str, log_file: &str, request: &DumpRequest) -> Result<()> {
        if !self.prepared {
            return Err(Error::InvalidState);
        }

        if let Some(fd) = request.images_dir_fd {
            make_inheritable(fd)?;
        }

        let mut cmd = Command::new(&self.options.criu_bin);
        cmd.args(self.dump_args(action, log_file, request));

        command::run_cancellable(&mut cmd, request.cancellation)
    }
}

/// Lets `fd` survive exec into the engine child. Returns the previous flags.
fn make_inheritable(fd: RawFd) -> Result<FdFlag> {
    let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD)?);
    fcntl(fd, FcntlArg::F_SETFD(flags - FdFlag::FD_CLOEXEC))?;
    Ok(flags)
}

impl CheckpointEngine for CriuEngine {
    fn prepare(&mut self, config: &MigrationConfig) -> Result<()> {
        kill(config.pid, None)?;

        let output = command::output(Command::new(&self.options.criu_bin).arg("--version"))?;
        info!(
            "Using {}",
            String::from_utf8_lossy(&output.stdout).lines().next().unwrap_or("criu")
        );

        let flags = make_inheritable(config.page_server_fd)?;
        self.saved_fd_flags = Some((config.page_server_fd, flags));
        self.prepared = true;
        Ok(())
    }

    fn cleanup(&mut self) {
        if !self.prepared {
            warn!("Cleaning up an engine that was not prepared");
            return;
        }

        if let Some((fd, flags)) = self.saved_fd_flags.take() {
            if let Err(e) = fcntl(fd, FcntlArg::F_SETFD(flags)) {
                warn!("Failed to restore flags of page server fd {}: {}", fd, e);
            }
        }

        self.prepared = false;
        info!("Checkpoint engine released");
    }

    fn pre_dump(&mut self, request: &DumpRequest) -> Result<()> {
        self.run_dump("pre-dump", PRE_DUMP_LOG_FILE, request)
    }

    fn dump(&mut self, request: &DumpRequest) -> Result<()> {
        self.run_dump("dump", DUMP_LOG_FILE, request)
    }

    fn dump_stats(&self, images_dir: &Path) -> Result<DumpStats> {
        let stats_file = path!(images_dir / STATS_DUMP_FILE);

        let output = command::output(
            Command::new(&self.options.crit_bin)
                .arg("decode")
                .arg("-i")
                .arg(&stats_file),
        )?;

        DumpStats::from_image_json(&String::from_utf8_lossy(&output.stdout))
    }
}
