use std::process::ExitStatus;

use crate::types::phase::{HandshakeStage, Phase, Round};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("std::io error: `{0}`")]
    StdIO(#[from] std::io::Error),
    #[error("nix error: `{0}`")]
    Nix(#[from] nix::errno::Errno),
    #[error("JSON error: `{0}`")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: `{0}`")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Command `{command}` exited with {status}")]
    CommandFailed { command: String, status: ExitStatus },
    #[error("Invalid statistics: {0}")]
    InvalidStats(String),
    #[error("Invalid state")]
    InvalidState,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Not supported: `{0}`")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a migration attempt, tagged with the step that failed.
#[derive(thiserror::Error, Debug)]
pub enum MigrationError {
    #[error("Failed to prepare the checkpoint engine: {0}")]
    Preparation(#[source] Error),

    #[error("Peer failed to {stage} {round}: {source}")]
    PeerHandshake {
        round: Round,
        stage: HandshakeStage,
        #[source]
        source: Error,
    },

    #[error("Snapshot of iteration {iteration} failed: {source}")]
    Snapshot {
        iteration: u32,
        #[source]
        source: Error,
    },

    #[error("Failed to decode statistics of iteration {iteration}: {source}")]
    StatsDecode {
        iteration: u32,
        #[source]
        source: Error,
    },

    #[error("Final dump, copy and restore failed: {0}")]
    Finalize(#[source] Error),

    #[error("Migration cancelled during {0}")]
    Cancelled(Phase),
}

impl MigrationError {
    /// The orchestrator phase in which the migration failed.
    pub fn phase(&self) -> Phase {
        match self {
            MigrationError::Preparation(_) => Phase::Preparing,
            MigrationError::PeerHandshake {
                round: Round::Final,
                ..
            } => Phase::Finalizing,
            MigrationError::PeerHandshake { .. }
            | MigrationError::Snapshot { .. }
            | MigrationError::StatsDecode { .. } => Phase::Iterating,
            MigrationError::Finalize(_) => Phase::Finalizing,
            MigrationError::Cancelled(phase) => *phase,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MigrationError::Cancelled(_))
    }
}

pub type MigrationResult<T> = std::result::Result<T, MigrationError>;
