pub mod command;

use crate::error::Result;

/// The remote side of the migration. Calls strictly alternate
/// `begin_iteration`, `end_iteration`, `begin_iteration`, ...
pub trait PeerCoordinator {
    /// Tells the peer to get ready to receive a new increment.
    fn begin_iteration(&mut self) -> Result<()>;

    /// Tells the peer the increment is complete and may be committed.
    fn end_iteration(&mut self) -> Result<()>;
}
