use std::fmt::Display;

use strum::Display as StrumDisplay;

/// States of the migration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Preparing,
    Iterating,
    Finalizing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
#[strum(serialize_all = "snake_case")]
pub enum HandshakeStage {
    Begin,
    End,
}

/// A peer handshake round: one of the pre-copy iterations, or the final
/// stop-and-copy round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Round {
    PreCopy(u32),
    Final,
}

impl Display for Round {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Round::PreCopy(iteration) => write!(f, "iteration {}", iteration),
            Round::Final => write!(f, "final iteration"),
        }
    }
}
