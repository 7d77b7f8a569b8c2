//! Commands carried in replicated log entries

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use ticketraft_core::{ClientId, CommandId};

/// Operation a command asks the state machine to perform
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Take `n` tickets from a counter
    Decrement(i64),

    /// Record an opaque value
    Record(String),
}

/// A client command.
///
/// Identity is the `(client, id)` pair: two commands with the same pair are
/// the same request no matter what they carry. This is what duplicate
/// suppression on the leader relies on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Command {
    /// Client that issued the command and receives its response
    pub client: ClientId,
    /// Per-client sequence number
    pub id: CommandId,
    /// Payload
    pub op: Operation,
}

impl Command {
    pub fn new(client: ClientId, id: CommandId, op: Operation) -> Self {
        Self { client, id, op }
    }

    pub fn decrement(client: ClientId, id: CommandId, amount: i64) -> Self {
        Self::new(client, id, Operation::Decrement(amount))
    }

    pub fn record(client: ClientId, id: CommandId, value: impl Into<String>) -> Self {
        Self::new(client, id, Operation::Record(value.into()))
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.client == other.client && self.id == other.id
    }
}

impl Eq for Command {}

impl Hash for Command {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.client.hash(state);
        self.id.hash(state);
    }
}
