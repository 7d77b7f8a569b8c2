//! Client requests held back while no leader is known

use crate::message::ClientRequest;
use crate::network::Transport;
use ticketraft_core::NodeId;

/// Buffered update and committed-read requests.
///
/// Updates are always released before reads, each group in arrival order.
#[derive(Debug, Default)]
pub struct PendingRequests {
    updates: Vec<ClientRequest>,
    committed_reads: Vec<ClientRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a request. Unstable reads are never buffered and are ignored here.
    pub fn push(&mut self, request: ClientRequest) {
        match request {
            ClientRequest::Update { .. } => self.updates.push(request),
            ClientRequest::CommittedRead { .. } => self.committed_reads.push(request),
            ClientRequest::UnstableRead { client } => {
                tracing::warn!(client = %client, "unstable read offered to request buffer");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.updates.len() + self.committed_reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.committed_reads.is_empty()
    }

    /// Send everything to `target` and empty the buffers
    pub fn flush<St: 'static>(&mut self, transport: &dyn Transport<St>, target: NodeId) {
        if self.is_empty() {
            return;
        }
        tracing::debug!(target = %target, count = self.len(), "releasing buffered client requests");
        for request in self.updates.drain(..).chain(self.committed_reads.drain(..)) {
            transport.send(target, request.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RaftMessage;
    use crate::testing::RecordingTransport;
    use ticketraft_core::ClientId;
    use ticketraft_statemachine::Command;

    #[test]
    fn test_flush_releases_updates_before_reads() {
        let client = ClientId::new(1);
        let mut pending = PendingRequests::new();
        pending.push(ClientRequest::CommittedRead { client });
        pending.push(ClientRequest::Update {
            client,
            command: Command::decrement(client, 1, 1),
        });
        pending.push(ClientRequest::UnstableRead { client });
        assert_eq!(pending.len(), 2);

        let transport = RecordingTransport::<i64>::new();
        pending.flush(&transport, NodeId::new(3));
        assert!(pending.is_empty());

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(to, _)| *to == NodeId::new(3)));
        assert!(matches!(
            sent[0].1,
            RaftMessage::Client(ClientRequest::Update { .. })
        ));
        assert!(matches!(
            sent[1].1,
            RaftMessage::Client(ClientRequest::CommittedRead { .. })
        ));
    }
}
