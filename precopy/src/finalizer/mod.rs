pub mod dump_copy_restore;

use std::path::Path;

use crate::{engine::CheckpointEngine, error::Result, types::config::MigrationConfig};

/// Local side of the final stop-and-copy round.
pub trait LocalFinalizer {
    /// Takes the final snapshot on top of `parent` (the last pre-copy
    /// snapshot, if any), transfers it and resumes the process on the
    /// target.
    fn finalize(
        &mut self,
        engine: &mut dyn CheckpointEngine,
        config: &MigrationConfig,
        parent: Option<&Path>,
    ) -> Result<()>;
}
