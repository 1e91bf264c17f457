#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Once},
};

use nix::unistd::Pid;
use parking_lot::Mutex;

use precopy::{
    engine::{CheckpointEngine, DumpRequest},
    error::{Error, Result},
    finalizer::LocalFinalizer,
    orchestrator::Orchestrator,
    peer::PeerCoordinator,
    types::{
        cancellation::CancellationToken, config::MigrationConfig, dump_stats::DumpStats,
    },
};

static INIT: Once = Once::new();

pub fn setup() {
    INIT.call_once(|| {
        let _ = pretty_env_logger::formatted_builder()
            .parse_default_env()
            .is_test(true)
            .try_init();
    });
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Prepare,
    Cleanup,
    PreDump {
        dir: PathBuf,
        parent: Option<PathBuf>,
    },
    DumpStats(PathBuf),
    BeginIteration,
    EndIteration,
    Finalize {
        parent: Option<PathBuf>,
    },
}

/// Ordered record of every collaborator call.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    pub fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    pub fn count(&self, f: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().iter().filter(|e| f(e)).count()
    }

    pub fn pre_dumps(&self) -> Vec<(PathBuf, Option<PathBuf>)> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::PreDump { dir, parent } => Some((dir.clone(), parent.clone())),
                _ => None,
            })
            .collect()
    }
}

/// Engine that writes a fake statistics image with the next value of
/// `pages` into each pre-dump directory.
#[derive(Default)]
pub struct MockEngine {
    pub journal: Journal,
    pub pages: Vec<u64>,
    pub fail_prepare: bool,
    /// 1-based pre-dump that fails.
    pub fail_pre_dump_at: Option<usize>,
    /// 1-based pre-dump whose statistics cannot be decoded.
    pub corrupt_stats_at: Option<usize>,
    /// Cancel this token while running the given 1-based pre-dump.
    pub cancel_at: Option<(usize, CancellationToken)>,
    pub nr_pre_dumps: usize,
}

impl MockEngine {
    pub fn new(journal: &Journal, pages: &[u64]) -> Self {
        Self {
            journal: journal.clone(),
            pages: pages.to_vec(),
            ..Default::default()
        }
    }
}

impl CheckpointEngine for MockEngine {
    fn prepare(&mut self, _config: &MigrationConfig) -> Result<()> {
        self.journal.push(Event::Prepare);
        if self.fail_prepare {
            return Err(Error::NotSupported("mock engine".to_owned()));
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        self.journal.push(Event::Cleanup);
    }

    fn pre_dump(&mut self, request: &DumpRequest) -> Result<()> {
        self.nr_pre_dumps += 1;
        let n = self.nr_pre_dumps;

        self.journal.push(Event::PreDump {
            dir: request.images_dir.to_owned(),
            parent: request.parent.map(Path::to_owned),
        });

        if let Some((at, token)) = &self.cancel_at {
            if *at == n {
                token.cancel();
                return request.cancellation.check();
            }
        }

        if self.fail_pre_dump_at == Some(n) {
            return Err(Error::InvalidState);
        }

        let pages_written = self.pages.get(n - 1).copied().unwrap_or(0);
        let image = if self.corrupt_stats_at == Some(n) {
            "{\"entries\": []}".to_owned()
        } else {
            format!(
                "{{\"entries\": [{{\"dump\": {{\"pages_written\": {}}}}}]}}",
                pages_written
            )
        };
        // Written through the descriptor, so a handle closed too early fails here.
        let images_dir = match request.images_dir_fd {
            Some(fd) => PathBuf::from(format!("/proc/self/fd/{}", fd)),
            None => request.images_dir.to_owned(),
        };
        fs::write(images_dir.join("stats-dump"), image)?;

        Ok(())
    }

    fn dump(&mut self, _request: &DumpRequest) -> Result<()> {
        Ok(())
    }

    fn dump_stats(&self, images_dir: &Path) -> Result<DumpStats> {
        self.journal.push(Event::DumpStats(images_dir.to_owned()));
        DumpStats::from_image_json(&fs::read_to_string(images_dir.join("stats-dump"))?)
    }
}

#[derive(Default)]
pub struct MockPeer {
    pub journal: Journal,
    /// 1-based `begin_iteration` call that fails.
    pub fail_begin_at: Option<usize>,
    /// 1-based `end_iteration` call that fails.
    pub fail_end_at: Option<usize>,
    pub nr_begins: usize,
    pub nr_ends: usize,
}

impl MockPeer {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ..Default::default()
        }
    }
}

impl PeerCoordinator for MockPeer {
    fn begin_iteration(&mut self) -> Result<()> {
        self.nr_begins += 1;
        self.journal.push(Event::BeginIteration);
        if self.fail_begin_at == Some(self.nr_begins) {
            return Err(Error::NotSupported("peer begin".to_owned()));
        }
        Ok(())
    }

    fn end_iteration(&mut self) -> Result<()> {
        self.nr_ends += 1;
        self.journal.push(Event::EndIteration);
        if self.fail_end_at == Some(self.nr_ends) {
            return Err(Error::NotSupported("peer end".to_owned()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockFinalizer {
    pub journal: Journal,
    pub fail: bool,
}

impl MockFinalizer {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            fail: false,
        }
    }
}

impl LocalFinalizer for MockFinalizer {
    fn finalize(
        &mut self,
        _engine: &mut dyn CheckpointEngine,
        _config: &MigrationConfig,
        parent: Option<&Path>,
    ) -> Result<()> {
        self.journal.push(Event::Finalize {
            parent: parent.map(Path::to_owned),
        });
        if self.fail {
            return Err(Error::InvalidState);
        }
        Ok(())
    }
}

pub fn config(work_dir: &Path) -> MigrationConfig {
    MigrationConfig::new(Pid::from_raw(4242), 3, work_dir)
}

pub fn orchestrator(
    work_dir: &Path,
    engine: MockEngine,
    peer: MockPeer,
    finalizer: MockFinalizer,
) -> Orchestrator {
    Orchestrator::new(
        config(work_dir),
        Box::new(engine),
        Box::new(peer),
        Box::new(finalizer),
    )
}
