//! TicketRaft Raft - consensus engine for a replicated state machine
//!
//! - `message`: closed message enums for peers, clients, control and diagnostics
//! - `log`: log entries and index helpers
//! - `storage`: durable per-node state (memory and RocksDB backends)
//! - `network`: in-process transport
//! - `core`: state shared by every role
//! - `follower`, `candidate`, `leader`: the three roles
//! - `node`: role dispatch and transitions
//! - `server`: the per-node task with crash supervision
//! - `timer`: deadline waits for task loops

pub mod candidate;
pub mod core;
pub mod follower;
pub mod leader;
pub mod log;
pub mod message;
pub mod network;
pub mod node;
pub mod pending;
pub mod server;
pub mod storage;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::core::RaftCore;
pub use candidate::votes_required;
pub use log::LogEntry;
pub use message::*;
pub use network::{LocalNetwork, Transport};
pub use node::{Outcome, RaftNode};
pub use server::RaftServer;
pub use storage::{DurableStore, MemoryStore, RocksDbStore};
pub use timer::wait_until;
