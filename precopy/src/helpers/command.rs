use std::{
    process::{Command, Output},
    thread,
    time::Duration,
};

use log::{debug, warn};

use crate::{
    error::{Error, Result},
    types::cancellation::CancellationToken,
};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn describe(cmd: &Command) -> String {
    format!("{:?}", cmd)
}

/// Runs `cmd` to completion and fails on a non-zero exit status.
pub fn run(cmd: &mut Command) -> Result<()> {
    let command = describe(cmd);
    debug!("Running {}", command);

    let status = cmd.status()?;
    if !status.success() {
        return Err(Error::CommandFailed { command, status });
    }

    Ok(())
}

/// Runs `cmd` to completion, capturing its output.
pub fn output(cmd: &mut Command) -> Result<Output> {
    let command = describe(cmd);
    debug!("Running {}", command);

    let output = cmd.output()?;
    if !output.status.success() {
        warn!(
            "{} failed, stderr:\n{}",
            command,
            String::from_utf8_lossy(&output.stderr)
        );
        return Err(Error::CommandFailed {
            command,
            status: output.status,
        });
    }

    Ok(output)
}

/// Like [`run`], but kills the child and returns `Error::Cancelled` as soon
/// as `cancellation` fires.
pub fn run_cancellable(cmd: &mut Command, cancellation: &CancellationToken) -> Result<()> {
    cancellation.check()?;

    let command = describe(cmd);
    debug!("Running {}", command);

    let mut child = cmd.spawn()?;

    loop {
        if let Some(status) = child.try_wait()? {
            if !status.success() {
                return Err(Error::CommandFailed { command, status });
            }
            return Ok(());
        }

        if cancellation.is_cancelled() {
            warn!("Killing {} on cancellation", command);
            // The child may have exited since `try_wait`.
            let _ = child.kill();
            child.wait()?;
            return Err(Error::Cancelled);
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Runs a user-supplied shell snippet with `sh -c`.
pub fn shell(snippet: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(snippet);
    cmd
}
