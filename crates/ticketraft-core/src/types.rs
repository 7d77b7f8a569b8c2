//! Core types for TicketRaft

use serde::{Deserialize, Serialize};
use std::fmt;

/// Election epoch. Starts at 0 and only ever increases on a node.
pub type Term = i64;

/// Position in the replicated log, indexed from 0.
///
/// `-1` means "before the first entry", both for `commitIndex`/`lastApplied`
/// and for `prevLogIndex` in an AppendEntries request.
pub type LogIndex = i64;

/// Client-assigned sequence number of a command.
pub type CommandId = u64;

/// Sentinel for "no entry" in index and term fields.
pub const NONE: i64 = -1;

/// Server identifier in the cluster
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server-{}", self.0)
    }
}

/// Client identifier.
///
/// This is the opaque reference stored inside every command so the leader can
/// answer the originating client once the command commits.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl ClientId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Role a server currently plays
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Behavior {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Follower => write!(f, "FOLLOWER"),
            Self::Candidate => write!(f, "CANDIDATE"),
            Self::Leader => write!(f, "LEADER"),
        }
    }
}
