pub mod convergence;
pub mod engine;
pub mod error;
pub mod finalizer;
pub mod helpers;
pub mod orchestrator;
pub mod peer;
pub mod snapshot_dirs;
pub mod statistics;
pub mod types;

use std::{
    fs,
    path::{Path, PathBuf},
};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::convergence::ConvergencePolicy;
use crate::engine::criu::{CriuEngine, CriuOptions};
use crate::error::{MigrationResult, Result};
use crate::finalizer::dump_copy_restore::DumpCopyRestore;
use crate::orchestrator::Orchestrator;
use crate::peer::command::CommandPeer;
use crate::statistics::{MigrationSummary, Statistics};
use crate::types::{cancellation::CancellationToken, config::MigrationConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatsOutput {
    File(PathBuf),
    StdOut,
}

impl StatsOutput {
    pub fn write(&self, stats: &dyn Statistics) -> Result<()> {
        let s = format!("{}\n", statistics::as_text(stats));

        match self {
            StatsOutput::File(path) => fs::write(path, s)?,
            StatsOutput::StdOut => print!("{}", s),
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(default, pattern = "owned")]
#[serde(default)]
pub struct MigrationOptions {
    /// When to stop pre-copying
    pub policy: ConvergencePolicy,

    /// Checkpoint engine options
    pub criu: CriuOptions,

    // command peer options
    pub begin_iteration_cmd: Option<String>,
    pub end_iteration_cmd: Option<String>,

    // finalizer options
    pub restore_cmd: String,

    /// Dump statistics after a successful migration
    pub dump_stats: Option<StatsOutput>,
}

impl MigrationOptions {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }
}

/// Migrates `config.pid` with the `criu` engine, shell-command peer hooks
/// and the dump-copy-restore finalizer configured in `options`.
pub fn run(
    config: MigrationConfig,
    options: MigrationOptions,
    cancellation: CancellationToken,
) -> MigrationResult<MigrationSummary> {
    let peer = CommandPeer::new(options.begin_iteration_cmd, options.end_iteration_cmd)
        .with_pid(config.pid);

    Orchestrator::new(
        config,
        Box::new(CriuEngine::new(options.criu)),
        Box::new(peer),
        Box::new(DumpCopyRestore::new(options.restore_cmd)),
    )
    .with_policy(options.policy)
    .with_cancellation(cancellation)
    .migrate()
}
