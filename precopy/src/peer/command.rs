use log::info;
use nix::unistd::Pid;

use super::PeerCoordinator;
use crate::{error::Result, helpers::command};

/// Peer coordinator that runs shell commands (e.g. `ssh` wrappers) at
/// iteration boundaries. An unset command is a no-op.
///
/// Commands see `PRECOPY_ROUND` (handshake number, counting from 1, the
/// final round included) and `PRECOPY_PID`.
#[derive(Debug, Clone, Default)]
pub struct CommandPeer {
    begin_cmd: Option<String>,
    end_cmd: Option<String>,
    pid: Option<Pid>,
    round: u32,
}

impl CommandPeer {
    pub fn new(begin_cmd: Option<String>, end_cmd: Option<String>) -> Self {
        Self {
            begin_cmd,
            end_cmd,
            pid: None,
            round: 0,
        }
    }

    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pid = Some(pid);
        self
    }

    fn run_hook(&self, hook: Option<&str>) -> Result<()> {
        let Some(snippet) = hook else {
            return Ok(());
        };

        let mut cmd = command::shell(snippet);
        cmd.env("PRECOPY_ROUND", self.round.to_string());
        if let Some(pid) = self.pid {
            cmd.env("PRECOPY_PID", pid.as_raw().to_string());
        }

        command::run(&mut cmd)
    }
}

impl PeerCoordinator for CommandPeer {
    fn begin_iteration(&mut self) -> Result<()> {
        self.round += 1;
        info!("Peer: begin round {}", self.round);
        self.run_hook(self.begin_cmd.as_deref())
    }

    fn end_iteration(&mut self) -> Result<()> {
        info!("Peer: end round {}", self.round);
        self.run_hook(self.end_cmd.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::CommandPeer;
    use crate::peer::PeerCoordinator;

    #[test]
    fn test_unset_hooks_are_noops() {
        let mut peer = CommandPeer::default();

        assert!(peer.begin_iteration().is_ok());
        assert!(peer.end_iteration().is_ok());
    }

    #[test]
    fn test_hooks_see_round_number() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("rounds");

        let mut peer = CommandPeer::new(
            Some(format!("echo begin $PRECOPY_ROUND >> {}", log.display())),
            Some(format!("echo end $PRECOPY_ROUND >> {}", log.display())),
        );

        for _ in 0..2 {
            peer.begin_iteration().unwrap();
            peer.end_iteration().unwrap();
        }

        assert_eq!(
            fs::read_to_string(&log).unwrap(),
            "begin 1\nend 1\nbegin 2\nend 2\n"
        );
    }

    #[test]
    fn test_failing_hook_is_an_error() {
        let mut peer = CommandPeer::new(Some("exit 1".to_owned()), None);

        assert!(peer.begin_iteration().is_err());
    }
}
