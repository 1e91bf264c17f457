use std::{os::fd::AsRawFd, time::Instant};

use derivative::Derivative;
use log::{debug, error, info, warn};

use crate::{
    convergence::{ConvergencePolicy, StopReason},
    engine::{CheckpointEngine, DumpRequest},
    error::{Error, MigrationError, MigrationResult, Result},
    finalizer::LocalFinalizer,
    peer::PeerCoordinator,
    snapshot_dirs::SnapshotDirSequence,
    statistics::{IterationRecord, MigrationSummary},
    types::{
        cancellation::CancellationToken,
        config::MigrationConfig,
        dump_stats::DumpStats,
        phase::{HandshakeStage, Phase, Round},
    },
};

/// Drives one pre-copy live migration: iterates incremental snapshots until
/// the convergence policy says stop, then runs the final stop-and-copy round.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Orchestrator {
    config: MigrationConfig,
    policy: ConvergencePolicy,
    cancellation: CancellationToken,
    #[derivative(Debug = "ignore")]
    engine: Box<dyn CheckpointEngine>,
    #[derivative(Debug = "ignore")]
    peer: Box<dyn PeerCoordinator>,
    #[derivative(Debug = "ignore")]
    finalizer: Box<dyn LocalFinalizer>,
}

fn transition(phase: &mut Phase, next: Phase) {
    debug!("Migration phase: {} -> {}", phase, next);
    *phase = next;
}

impl Orchestrator {
    pub fn new(
        config: MigrationConfig,
        engine: Box<dyn CheckpointEngine>,
        peer: Box<dyn PeerCoordinator>,
        finalizer: Box<dyn LocalFinalizer>,
    ) -> Self {
        Self {
            config,
            policy: ConvergencePolicy::default(),
            cancellation: CancellationToken::new(),
            engine,
            peer,
            finalizer,
        }
    }

    pub fn with_policy(mut self, policy: ConvergencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Token that aborts the migration at the next iteration boundary, or
    /// in the middle of a pre-dump if the engine cooperates.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn migrate(mut self) -> MigrationResult<MigrationSummary> {
        let mut phase = Phase::Preparing;

        info!(
            "Migrating PID {} with snapshots under {}",
            self.config.pid,
            self.config.work_dir.display()
        );

        let result = self.run(&mut phase);

        match &result {
            Ok(summary) => {
                transition(&mut phase, Phase::Done);
                info!(
                    "Migration done after {} pre-copy iterations ({})",
                    summary.nr_iterations(),
                    summary.stop_reason
                );
            }
            Err(e) => {
                error!("Migration failed in {} phase: {}", e.phase(), e);
                transition(&mut phase, Phase::Failed);
            }
        }

        result
    }

    fn run(&mut self, phase: &mut Phase) -> MigrationResult<MigrationSummary> {
        let Self {
            config,
            policy,
            cancellation,
            engine,
            peer,
            finalizer,
        } = self;

        engine
            .prepare(config)
            .map_err(MigrationError::Preparation)?;
        let mut engine = scopeguard::guard(engine.as_mut(), |engine| engine.cleanup());

        let mut dirs =
            SnapshotDirSequence::new(&config.work_dir).map_err(MigrationError::Preparation)?;

        transition(phase, Phase::Iterating);
        let precopy_start = Instant::now();
        let (iterations, stop_reason) = run_precopy(
            &mut **engine,
            peer.as_mut(),
            &mut dirs,
            config,
            policy,
            cancellation,
        )?;
        let precopy_time = precopy_start.elapsed();

        transition(phase, Phase::Finalizing);
        let finalize_start = Instant::now();
        run_final_round(
            &mut **engine,
            peer.as_mut(),
            finalizer.as_mut(),
            &dirs,
            config,
            cancellation,
        )?;

        Ok(MigrationSummary {
            iterations,
            stop_reason,
            precopy_time,
            finalize_time: finalize_start.elapsed(),
        })
    }
}

fn run_precopy(
    engine: &mut dyn CheckpointEngine,
    peer: &mut dyn PeerCoordinator,
    dirs: &mut SnapshotDirSequence,
    config: &MigrationConfig,
    policy: &ConvergencePolicy,
    cancellation: &CancellationToken,
) -> MigrationResult<(Vec<IterationRecord>, StopReason)> {
    let mut previous = DumpStats::default();
    let mut iterations = Vec::new();
    let mut iteration = 0;

    loop {
        iteration += 1;

        if cancellation.is_cancelled() {
            return Err(MigrationError::Cancelled(Phase::Iterating));
        }

        info!("Pre-copy iteration {}", iteration);
        let started = Instant::now();

        peer.begin_iteration()
            .map_err(|source| MigrationError::PeerHandshake {
                round: Round::PreCopy(iteration),
                stage: HandshakeStage::Begin,
                source,
            })?;

        let parent = dirs.last_path();
        let dir = dirs
            .open_next()
            .map_err(|source| MigrationError::Snapshot { iteration, source })?;
        let dir_path = dir.path().to_owned();

        let dumped = engine.pre_dump(&DumpRequest {
            pid: config.pid,
            images_dir: &dir_path,
            images_dir_fd: Some(dir.as_raw_fd()),
            parent: parent.as_deref(),
            page_server_fd: config.page_server_fd,
            cancellation,
        });
        drop(dir);
        dumped.map_err(|source| match source {
            Error::Cancelled => MigrationError::Cancelled(Phase::Iterating),
            source => MigrationError::Snapshot { iteration, source },
        })?;

        peer.end_iteration()
            .map_err(|source| MigrationError::PeerHandshake {
                round: Round::PreCopy(iteration),
                stage: HandshakeStage::End,
                source,
            })?;

        let stats = engine
            .dump_stats(&dir_path)
            .map_err(|source| MigrationError::StatsDecode { iteration, source })?;

        iterations.push(IterationRecord {
            iteration,
            dir: dir_path,
            stats,
            elapsed: started.elapsed(),
        });

        if let Some(reason) = policy.should_stop(iteration, &stats, &previous) {
            return Ok((iterations, reason));
        }

        previous = stats;
    }
}

fn run_final_round(
    engine: &mut dyn CheckpointEngine,
    peer: &mut dyn PeerCoordinator,
    finalizer: &mut dyn LocalFinalizer,
    dirs: &SnapshotDirSequence,
    config: &MigrationConfig,
    cancellation: &CancellationToken,
) -> MigrationResult<()> {
    if cancellation.is_cancelled() {
        return Err(MigrationError::Cancelled(Phase::Finalizing));
    }

    info!("Final iteration");

    peer.begin_iteration()
        .map_err(|source| MigrationError::PeerHandshake {
            round: Round::Final,
            stage: HandshakeStage::Begin,
            source,
        })?;

    let parent = dirs.last_path();
    let finalized = finalizer.finalize(engine, config, parent.as_deref());
    let ended = peer.end_iteration();

    combine_final_results(finalized, ended)
}

/// A failed finalize means the process was not resumed on the target, so it
/// is reported over a failed end-of-iteration handshake.
fn combine_final_results(finalized: Result<()>, ended: Result<()>) -> MigrationResult<()> {
    match (finalized, ended) {
        (Err(e), ended) => {
            if let Err(end_error) = ended {
                warn!(
                    "Peer also failed to end the final iteration: {}",
                    end_error
                );
            }
            Err(MigrationError::Finalize(e))
        }
        (Ok(()), Err(source)) => Err(MigrationError::PeerHandshake {
            round: Round::Final,
            stage: HandshakeStage::End,
            source,
        }),
        (Ok(()), Ok(())) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::combine_final_results;
    use crate::{
        error::{Error, MigrationError},
        types::phase::{HandshakeStage, Phase, Round},
    };

    #[test]
    fn test_finalize_error_wins_over_end_error() {
        let result = combine_final_results(Err(Error::InvalidState), Err(Error::Cancelled));

        assert!(matches!(
            result,
            Err(MigrationError::Finalize(Error::InvalidState))
        ));
    }

    #[test]
    fn test_finalize_error_alone() {
        let result = combine_final_results(Err(Error::InvalidState), Ok(()));

        assert!(matches!(
            result,
            Err(MigrationError::Finalize(Error::InvalidState))
        ));
    }

    #[test]
    fn test_end_error_reported_after_successful_finalize() {
        let result = combine_final_results(Ok(()), Err(Error::InvalidState));

        match result {
            Err(
                e @ MigrationError::PeerHandshake {
                    round: Round::Final,
                    stage: HandshakeStage::End,
                    source: Error::InvalidState,
                },
            ) => assert_eq!(e.phase(), Phase::Finalizing),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_both_succeed() {
        assert!(combine_final_results(Ok(()), Ok(())).is_ok());
    }
}
