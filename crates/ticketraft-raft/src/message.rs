//! Protocol messages
//!
//! Each protocol gets its own closed enum: peer traffic between servers,
//! client requests and responses, control messages from the surrounding
//! runtime, and diagnostics used by tests. Diagnostics carry a oneshot reply
//! channel instead of a sender address.

use crate::log::LogEntry;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use ticketraft_core::{Behavior, ClientId, CommandId, LogIndex, NodeId, Term};
use ticketraft_statemachine::Command;

/// AppendEntries RPC arguments, also used as heartbeat when `entries` is empty
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppendEntries {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

/// AppendEntries RPC response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub sender: NodeId,
    pub term: Term,
    pub success: bool,
    /// `prev_log_index + entries.len()` of the request being answered
    pub match_index: LogIndex,
}

/// RequestVote RPC arguments
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestVote {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

/// RequestVote RPC response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

/// Server-to-server traffic
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PeerMessage {
    AppendEntries(AppendEntries),
    AppendEntriesResponse(AppendEntriesResponse),
    RequestVote(RequestVote),
    RequestVoteResponse(RequestVoteResponse),
}

impl PeerMessage {
    pub fn term(&self) -> Term {
        match self {
            Self::AppendEntries(m) => m.term,
            Self::AppendEntriesResponse(m) => m.term,
            Self::RequestVote(m) => m.term,
            Self::RequestVoteResponse(m) => m.term,
        }
    }
}

/// Requests a client sends to a server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientRequest {
    /// Replicated update
    Update { client: ClientId, command: Command },

    /// Read of the committed state, served by the leader
    CommittedRead { client: ClientId },

    /// Read of the tentative state, served by whichever server receives it
    UnstableRead { client: ClientId },
}

impl ClientRequest {
    pub fn client(&self) -> ClientId {
        match self {
            Self::Update { client, .. }
            | Self::CommittedRead { client }
            | Self::UnstableRead { client } => *client,
        }
    }
}

/// Messages from the runtime that owns a server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Arm the election timer
    Start,
    /// Stop the server task
    ShutDown,
    /// Assign the peer set (every other server in the cluster)
    SetPeers(Vec<NodeId>),
    /// Injected fault: the server instance crashes and is rebuilt from its store
    Failure,
}

/// Snapshot of a server's persistent and volatile bookkeeping
#[derive(Clone, Debug, PartialEq)]
pub struct NodeStateReport {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub log: Vec<LogEntry>,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
}

/// Introspection for test harnesses
#[derive(Debug)]
pub enum Diagnostic<St> {
    GetState(oneshot::Sender<NodeStateReport>),
    GetLog(oneshot::Sender<Vec<LogEntry>>),
    GetCommitIndex(oneshot::Sender<LogIndex>),
    GetStateMachineState(oneshot::Sender<St>),
    GetBehavior(oneshot::Sender<Behavior>),
    /// Append entries to the local log without going through replication
    SaveEntries(Vec<LogEntry>),
}

/// Everything a server's inbox accepts
#[derive(Debug)]
pub enum RaftMessage<St> {
    Peer(PeerMessage),
    Client(ClientRequest),
    Control(ControlMessage),
    Diagnostic(Diagnostic<St>),
}

impl<St> From<PeerMessage> for RaftMessage<St> {
    fn from(msg: PeerMessage) -> Self {
        Self::Peer(msg)
    }
}

impl<St> From<ClientRequest> for RaftMessage<St> {
    fn from(msg: ClientRequest) -> Self {
        Self::Client(msg)
    }
}

impl<St> From<ControlMessage> for RaftMessage<St> {
    fn from(msg: ControlMessage) -> Self {
        Self::Control(msg)
    }
}

impl<St> From<Diagnostic<St>> for RaftMessage<St> {
    fn from(msg: Diagnostic<St>) -> Self {
        Self::Diagnostic(msg)
    }
}

/// One entry of a client's outbound request queue
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum QueuedRequest {
    Update(Command),
    CommittedRead,
    UnstableRead,
    /// Fault marker: delivered as [`ControlMessage::Failure`], never answered
    Failure,
}

impl QueuedRequest {
    /// Message delivered to the target server on behalf of `client`
    pub fn to_message<St>(&self, client: ClientId) -> RaftMessage<St> {
        match self {
            Self::Update(command) => ClientRequest::Update {
                client,
                command: command.clone(),
            }
            .into(),
            Self::CommittedRead => ClientRequest::CommittedRead { client }.into(),
            Self::UnstableRead => ClientRequest::UnstableRead { client }.into(),
            Self::Failure => ControlMessage::Failure.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Update(_) => "update",
            Self::CommittedRead => "committed-read",
            Self::UnstableRead => "unstable-read",
            Self::Failure => "failure",
        }
    }
}

/// Everything a client's inbox accepts
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage<St> {
    Start,
    SetRequestQueue(Vec<QueuedRequest>),
    UpdateResponse { success: bool, command_id: CommandId },
    CommittedReadResponse { state: St },
    UnstableReadResponse { state: St },
    ShutDown,
}
