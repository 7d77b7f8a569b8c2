//! Test helpers: a transport that records instead of delivering

use crate::core::RaftCore;
use crate::message::{ClientMessage, PeerMessage, RaftMessage};
use crate::network::Transport;
use crate::node::RaftNode;
use crate::storage::{DurableStore, MemoryStore};
use std::sync::{Arc, Mutex};
use ticketraft_core::{ClientId, NodeId, RaftConfig};
use ticketraft_statemachine::{Command, CommandList, TicketCounter};

pub struct RecordingTransport<St> {
    sent: Mutex<Vec<(NodeId, RaftMessage<St>)>>,
    replies: Mutex<Vec<(ClientId, ClientMessage<St>)>>,
}

impl<St: Send + 'static> RecordingTransport<St> {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
        }
    }

    pub fn take_sent(&self) -> Vec<(NodeId, RaftMessage<St>)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn take_replies(&self) -> Vec<(ClientId, ClientMessage<St>)> {
        std::mem::take(&mut *self.replies.lock().unwrap())
    }

    /// Peer messages sent so far, draining the record
    pub fn take_peer_messages(&self) -> Vec<(NodeId, PeerMessage)> {
        self.take_sent()
            .into_iter()
            .filter_map(|(to, msg)| match msg {
                RaftMessage::Peer(m) => Some((to, m)),
                _ => None,
            })
            .collect()
    }
}

impl<St: Send + 'static> Transport<St> for RecordingTransport<St> {
    fn send(&self, to: NodeId, msg: RaftMessage<St>) {
        self.sent.lock().unwrap().push((to, msg));
    }

    fn reply(&self, to: ClientId, msg: ClientMessage<St>) {
        self.replies.lock().unwrap().push((to, msg));
    }
}

pub fn node_ids(ids: &[u64]) -> Vec<NodeId> {
    ids.iter().copied().map(NodeId::new).collect()
}

/// Follower `id` with a ticket counter, a memory store holding `peers`, and a
/// recording transport
pub fn counter_node(
    id: u64,
    peers: &[u64],
    tickets: i64,
) -> (RaftNode<TicketCounter>, Arc<RecordingTransport<i64>>) {
    let mut store = MemoryStore::new();
    store.set_node_id(NodeId::new(id));
    store.save_peers(&node_ids(peers)).unwrap();

    let transport = Arc::new(RecordingTransport::new());
    let core = RaftCore::load(
        NodeId::new(id),
        Box::new(store),
        TicketCounter::new(tickets),
        transport.clone(),
        RaftConfig::default(),
    )
    .unwrap();
    (RaftNode::new(core), transport)
}

/// Lone follower `id` replicating a command list
pub fn list_node(id: u64) -> (RaftNode<CommandList>, Arc<RecordingTransport<Vec<Command>>>) {
    let mut store = MemoryStore::new();
    store.set_node_id(NodeId::new(id));

    let transport = Arc::new(RecordingTransport::new());
    let core = RaftCore::load(
        NodeId::new(id),
        Box::new(store),
        CommandList::new(),
        transport.clone(),
        RaftConfig::default(),
    )
    .unwrap();
    (RaftNode::new(core), transport)
}
