use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
    time::Duration,
};

use crate::{convergence::StopReason, types::dump_stats::DumpStats};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(u64),
    Float(f64),
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
        }
    }
}

pub trait Statistics {
    fn name(&self) -> &'static str;

    fn statistics(&self) -> Box<[(String, Value)]>;
}

pub fn as_text(stats: &dyn Statistics) -> String {
    stats
        .statistics()
        .iter()
        .map(|(k, v)| format!("{}.{}={}", stats.name(), k, v))
        .collect::<Vec<String>>()
        .join("\n")
}

/// One completed pre-copy iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iteration: u32,
    pub dir: PathBuf,
    pub stats: DumpStats,
    pub elapsed: Duration,
}

/// Result of a successful migration.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationSummary {
    pub iterations: Vec<IterationRecord>,
    pub stop_reason: StopReason,
    pub precopy_time: Duration,
    pub finalize_time: Duration,
}

impl MigrationSummary {
    pub fn nr_iterations(&self) -> usize {
        self.iterations.len()
    }

    pub fn total_pages_written(&self) -> u64 {
        self.iterations.iter().map(|r| r.stats.pages_written).sum()
    }
}

impl Statistics for MigrationSummary {
    fn name(&self) -> &'static str {
        "migration"
    }

    fn statistics(&self) -> Box<[(String, Value)]> {
        let mut stats = vec![
            (
                "nr_iterations".to_owned(),
                Value::Int(self.nr_iterations() as u64),
            ),
            (
                "total_pages_written".to_owned(),
                Value::Int(self.total_pages_written()),
            ),
            (
                "precopy_time".to_owned(),
                Value::Float(self.precopy_time.as_secs_f64()),
            ),
            (
                "finalize_time".to_owned(),
                Value::Float(self.finalize_time.as_secs_f64()),
            ),
        ];

        for record in &self.iterations {
            stats.extend(
                record
                    .stats
                    .statistics()
                    .into_iter()
                    .map(|(k, v)| (format!("iter{}.{}", record.iteration, k), v)),
            );
            stats.push((
                format!("iter{}.elapsed", record.iteration),
                Value::Float(record.elapsed.as_secs_f64()),
            ));
        }

        stats.into_boxed_slice()
    }
}
