//! The state machine contract

use crate::command::Command;
use std::fmt;

/// A deterministic command applier replicated by the consensus engine.
///
/// Every server holds one committed instance plus a forked tentative copy
/// that also has the uncommitted log suffix applied. Leaders additionally fork
/// to check whether a command would leave the machine in a valid state before
/// accepting it into the log.
pub trait StateMachine: Send + Sized + 'static {
    /// Value returned to readers
    type State: Clone + fmt::Debug + PartialEq + Send + Sync + 'static;

    /// Apply a single command
    fn apply(&mut self, command: &Command);

    /// Apply commands in order
    fn apply_all(&mut self, commands: &[Command]) {
        for command in commands {
            self.apply(command);
        }
    }

    /// Current state
    fn state(&self) -> Self::State;

    /// Restore the value the machine was constructed with
    fn reset(&mut self);

    /// Independent copy sharing no mutable state with `self`
    fn fork(&self) -> Self;

    /// Domain invariant, checked after speculative application
    fn is_state_valid(&self) -> bool;
}

/// Client-side view of a read result.
pub trait ReadState {
    /// Whether nothing is left to request; a client stops its session when a
    /// read returns an exhausted state.
    fn is_exhausted(&self) -> bool;
}

impl ReadState for i64 {
    fn is_exhausted(&self) -> bool {
        *self <= 0
    }
}

impl ReadState for Vec<Command> {
    fn is_exhausted(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_reads_exhaust_at_zero() {
        assert!(0i64.is_exhausted());
        assert!((-2i64).is_exhausted());
        assert!(!1i64.is_exhausted());
    }

    #[test]
    fn test_command_list_never_exhausts() {
        assert!(!Vec::<Command>::new().is_exhausted());
    }
}
