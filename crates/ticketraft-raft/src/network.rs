//! In-process message delivery
//!
//! Servers and clients talk through a [`Transport`]. The only implementation
//! is [`LocalNetwork`], an address book of unbounded tokio channels. Each
//! channel preserves the order of messages from any single sender; nothing is
//! guaranteed across senders. Messages to unknown or stopped addresses are
//! dropped, which the protocol already tolerates as message loss.

use crate::message::{ClientMessage, RaftMessage};
use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use ticketraft_core::{ClientId, NodeId, Result, TicketRaftError};

/// Delivery of server and client messages
pub trait Transport<St>: Send + Sync + 'static {
    /// Deliver to a server inbox
    fn send(&self, to: NodeId, msg: RaftMessage<St>);

    /// Deliver to a client inbox
    fn reply(&self, to: ClientId, msg: ClientMessage<St>);
}

/// Channel-backed network shared by every task in a cluster
pub struct LocalNetwork<St> {
    nodes: DashMap<NodeId, UnboundedSender<RaftMessage<St>>>,
    clients: DashMap<ClientId, UnboundedSender<ClientMessage<St>>>,
}

impl<St: Send + 'static> LocalNetwork<St> {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            clients: DashMap::new(),
        }
    }

    /// Create the inbox for `id`, replacing any previous registration
    pub fn register_node(&self, id: NodeId) -> UnboundedReceiver<RaftMessage<St>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.nodes.insert(id, tx);
        rx
    }

    pub fn register_client(&self, id: ClientId) -> UnboundedReceiver<ClientMessage<St>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.insert(id, tx);
        rx
    }

    pub fn deregister_node(&self, id: NodeId) {
        self.nodes.remove(&id);
    }

    pub fn deregister_client(&self, id: ClientId) {
        self.clients.remove(&id);
    }

    /// Deliver to a server, reporting why delivery failed
    pub fn deliver(&self, to: NodeId, msg: RaftMessage<St>) -> Result<()> {
        let tx = self
            .nodes
            .get(&to)
            .map(|e| e.value().clone())
            .ok_or(TicketRaftError::UnknownNode(to))?;
        tx.send(msg)
            .map_err(|_| TicketRaftError::MailboxClosed(to.to_string()))
    }

    /// Deliver to a client, reporting why delivery failed
    pub fn deliver_to_client(&self, to: ClientId, msg: ClientMessage<St>) -> Result<()> {
        let tx = self
            .clients
            .get(&to)
            .map(|e| e.value().clone())
            .ok_or(TicketRaftError::UnknownClient(to))?;
        tx.send(msg)
            .map_err(|_| TicketRaftError::MailboxClosed(to.to_string()))
    }
}

impl<St: Send + 'static> Default for LocalNetwork<St> {
    fn default() -> Self {
        Self::new()
    }
}

impl<St: Send + 'static> Transport<St> for LocalNetwork<St> {
    fn send(&self, to: NodeId, msg: RaftMessage<St>) {
        if let Err(e) = self.deliver(to, msg) {
            tracing::debug!(to = %to, error = %e, "dropping server message");
        }
    }

    fn reply(&self, to: ClientId, msg: ClientMessage<St>) {
        if let Err(e) = self.deliver_to_client(to, msg) {
            tracing::debug!(to = %to, error = %e, "dropping client message");
        }
    }
}
