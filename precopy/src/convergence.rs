use std::fmt::Display;

use lazy_static::lazy_static;
use log::info;
use nix::unistd::{sysconf, SysconfVar};
use serde::{Deserialize, Serialize};

use crate::types::dump_stats::DumpStats;

lazy_static! {
    pub static ref PAGESIZE: u64 = sysconf(SysconfVar::PAGE_SIZE)
        .ok()
        .flatten()
        .map_or(4096, |size| size as u64);
}

/// Why the pre-copy loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The iteration ceiling was reached.
    MaxIterations { iteration: u32 },

    /// The last pre-dump wrote fewer pages than the floor, so the final
    /// stop-and-copy is cheap.
    TinyPreDump { pages_written: u64 },

    /// The dirty set grew by at least the allowed delta since the previous
    /// iteration, so pre-copying does not converge.
    GrowingDirtySet { delta: i64 },
}

impl Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::MaxIterations { iteration } => {
                write!(f, "max iterations reached ({})", iteration)
            }
            StopReason::TinyPreDump { pages_written } => {
                write!(f, "tiny pre-dump reached ({} pages)", pages_written)
            }
            StopReason::GrowingDirtySet { delta } => {
                write!(f, "growing iteration reached (delta {} pages)", delta)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergencePolicy {
    /// Upper bound on the number of pre-copy iterations.
    pub max_iterations: u32,

    /// Stop once an iteration writes fewer pages than this.
    pub min_pages_written: u64,

    /// Stop once the pages written grow by at least this much between two
    /// consecutive iterations.
    pub max_grow_delta: i64,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            min_pages_written: 64,
            max_grow_delta: 32,
        }
    }
}

impl ConvergencePolicy {
    /// Decides whether `iteration` (counting from 1) was the last pre-copy
    /// iteration. `previous` is all zeros for the first iteration.
    pub fn should_stop(
        &self,
        iteration: u32,
        current: &DumpStats,
        previous: &DumpStats,
    ) -> Option<StopReason> {
        let pages_written = current.pages_written;
        let delta = pages_written as i64 - previous.pages_written as i64;

        info!(
            "Iteration {}: {} pages written ({}), delta {}",
            iteration,
            pages_written,
            human_bytes::human_bytes(pages_written.saturating_mul(*PAGESIZE) as f64),
            delta
        );

        let reason = if iteration >= self.max_iterations {
            Some(StopReason::MaxIterations { iteration })
        } else if pages_written < self.min_pages_written {
            Some(StopReason::TinyPreDump { pages_written })
        } else if delta >= self.max_grow_delta {
            Some(StopReason::GrowingDirtySet { delta })
        } else {
            None
        };

        if let Some(reason) = reason {
            info!("`- {}", reason);
        }

        reason
    }
}
