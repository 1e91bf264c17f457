pub mod cancellation;
pub mod config;
pub mod dump_stats;
pub mod phase;
