//! Ticket counter

use crate::command::{Command, Operation};
use crate::machine::StateMachine;

/// Integer counter decremented by each command; invalid once negative.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketCounter {
    count: i64,
    initial: i64,
}

impl TicketCounter {
    pub fn new(count: i64) -> Self {
        Self {
            count,
            initial: count,
        }
    }
}

impl StateMachine for TicketCounter {
    type State = i64;

    fn apply(&mut self, command: &Command) {
        match &command.op {
            Operation::Decrement(amount) => self.count -= amount,
            Operation::Record(_) => {
                tracing::trace!(client = %command.client, id = command.id, "counter ignores record");
            }
        }
    }

    fn state(&self) -> i64 {
        self.count
    }

    fn reset(&mut self) {
        self.count = self.initial;
    }

    fn fork(&self) -> Self {
        self.clone()
    }

    fn is_state_valid(&self) -> bool {
        self.count >= 0
    }
}
