use std::fs::OpenOptions;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use git_version::git_version;
use log::{error, warn};
use nix::unistd::Pid;

use precopy::{
    statistics::as_text, types::cancellation::CancellationToken,
    types::config::MigrationConfig, MigrationOptions, StatsOutput,
};

#[derive(Parser, Debug)]
#[command(version = git_version!(fallback = "unknown"), about)]
struct CliArgs {
    /// PID of the root of the process tree to migrate.
    #[arg(short, long)]
    pid: i32,

    /// File descriptor of the socket connected to the remote page server.
    #[arg(long)]
    page_server_fd: RawFd,

    /// Directory to keep the per-iteration snapshots in.
    #[arg(short, long)]
    work_dir: PathBuf,

    /// Config file to use. Command line options override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of pre-copy iterations.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Stop pre-copying once an iteration writes fewer pages than this.
    #[arg(long)]
    min_pages_written: Option<u64>,

    /// Stop pre-copying once the pages written grow by at least this much between iterations.
    #[arg(long, allow_negative_numbers = true)]
    max_grow_delta: Option<i64>,

    /// Path to the criu binary.
    #[arg(long)]
    criu_bin: Option<PathBuf>,

    /// Path to the crit binary.
    #[arg(long)]
    crit_bin: Option<PathBuf>,

    /// Verbosity of the criu logs written into each snapshot directory.
    #[arg(long)]
    criu_log_level: Option<u8>,

    /// Shell command telling the peer to get ready for an iteration.
    #[arg(long)]
    begin_iteration_cmd: Option<String>,

    /// Shell command telling the peer an iteration is complete.
    #[arg(long)]
    end_iteration_cmd: Option<String>,

    /// Shell command that copies the final images over and restores the process on the target.
    #[arg(long)]
    restore_cmd: Option<String>,

    /// Dump statistics.
    #[arg(long)]
    dump_stats: bool,

    /// File to dump stats to.
    #[arg(long)]
    stats_output: Option<PathBuf>,

    /// File to write logs to.
    #[arg(long)]
    log_output: Option<PathBuf>,
}

impl CliArgs {
    fn options(&self) -> MigrationOptions {
        let mut options: MigrationOptions = match &self.config {
            Some(path) => {
                MigrationOptions::from_yaml_file(path).expect("Failed to load config file")
            }
            None => MigrationOptions::default(),
        };

        if let Some(v) = self.max_iterations {
            options.policy.max_iterations = v;
        }
        if let Some(v) = self.min_pages_written {
            options.policy.min_pages_written = v;
        }
        if let Some(v) = self.max_grow_delta {
            options.policy.max_grow_delta = v;
        }
        if let Some(v) = &self.criu_bin {
            options.criu.criu_bin = v.clone();
        }
        if let Some(v) = &self.crit_bin {
            options.criu.crit_bin = v.clone();
        }
        if let Some(v) = self.criu_log_level {
            options.criu.log_level = v;
        }
        if self.begin_iteration_cmd.is_some() {
            options.begin_iteration_cmd = self.begin_iteration_cmd.clone();
        }
        if self.end_iteration_cmd.is_some() {
            options.end_iteration_cmd = self.end_iteration_cmd.clone();
        }
        if let Some(v) = &self.restore_cmd {
            options.restore_cmd = v.clone();
        }

        if self.dump_stats {
            options.dump_stats = Some(match &self.stats_output {
                Some(path) => StatsOutput::File(path.clone()),
                None => StatsOutput::StdOut,
            });
        }

        options
    }
}

fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let mut env_logger_builder = pretty_env_logger::formatted_timed_builder();

    env_logger_builder.parse_default_env();

    if let Some(log_output) = &cli.log_output {
        let log_file = Box::new(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(log_output)
                .expect("Can't create file"),
        );

        env_logger_builder.target(pretty_env_logger::env_logger::Target::Pipe(log_file));

        log_panics::init();
    }

    env_logger_builder.init();

    let options = cli.options();

    if options.restore_cmd.trim().is_empty() {
        error!("No restore command given, use --restore-cmd or set restore_cmd in the config file");
        return ExitCode::FAILURE;
    }

    let cancellation = CancellationToken::new();
    let handler_token = cancellation.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupted, cancelling the migration");
        handler_token.cancel();
    })
    .expect("Failed to install the interrupt handler");

    let config = MigrationConfig::new(Pid::from_raw(cli.pid), cli.page_server_fd, &cli.work_dir);
    let dump_stats = options.dump_stats.clone();

    match precopy::run(config, options, cancellation) {
        Ok(summary) => {
            if let Some(output) = dump_stats {
                if let Err(e) = output.write(&summary) {
                    error!("Failed to dump statistics: {}", e);
                }
            } else {
                log::debug!("{}", as_text(&summary));
            }
            ExitCode::SUCCESS
        }
        Err(_) => ExitCode::FAILURE,
    }
}
