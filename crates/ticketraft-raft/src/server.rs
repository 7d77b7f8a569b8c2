//! Server task and crash supervision
//!
//! [`RaftServer`] owns everything that outlives a node instance: identity,
//! inbox, durable store and transport. It feeds inbox messages and timer
//! expiries to the current [`RaftNode`] one at a time. When the node reports an
//! injected fault, the instance is dropped and rebuilt from the store with its
//! state machine reset.

use crate::core::RaftCore;
use crate::message::{ControlMessage, RaftMessage};
use crate::network::Transport;
use crate::node::{Outcome, RaftNode};
use crate::storage::DurableStore;
use crate::timer::wait_until;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use ticketraft_core::{NodeId, RaftConfig, Result, TicketRaftError};
use ticketraft_statemachine::StateMachine;

pub struct RaftServer<S: StateMachine> {
    id: NodeId,
    inbox: UnboundedReceiver<RaftMessage<S::State>>,
    transport: Arc<dyn Transport<S::State>>,
    config: RaftConfig,
    node: Option<RaftNode<S>>,
    /// Whether `Start` has been received; survives crashes
    started: bool,
    restarts: u64,
}

impl<S: StateMachine> RaftServer<S> {
    pub fn new(
        id: NodeId,
        inbox: UnboundedReceiver<RaftMessage<S::State>>,
        state_machine: S,
        store: Box<dyn DurableStore>,
        transport: Arc<dyn Transport<S::State>>,
        config: RaftConfig,
    ) -> Result<Self> {
        let core = RaftCore::load(id, store, state_machine, Arc::clone(&transport), config.clone())?;
        Ok(Self {
            id,
            inbox,
            transport,
            config,
            node: Some(RaftNode::new(core)),
            started: false,
            restarts: 0,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    /// Process messages until `ShutDown`, a closed inbox, or a storage failure
    pub async fn run(mut self) -> Result<()> {
        tracing::debug!(node = %self.id, "server task started");
        let result = self.run_loop().await;
        match &result {
            Ok(()) => tracing::debug!(node = %self.id, restarts = self.restarts, "server task stopped"),
            Err(e) => tracing::error!(node = %self.id, error = %e, "server task aborted"),
        }
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            let deadline = self.node()?.deadline();
            tokio::select! {
                biased;

                msg = self.inbox.recv() => {
                    let Some(msg) = msg else {
                        return Ok(());
                    };
                    if matches!(msg, RaftMessage::Control(ControlMessage::Start)) {
                        self.started = true;
                    }
                    match self.node_mut()?.step(msg)? {
                        Outcome::Running => {}
                        Outcome::Crashed => self.recover()?,
                        Outcome::Stopped => return Ok(()),
                    }
                }
                _ = wait_until(deadline) => {
                    self.node_mut()?.on_timeout()?;
                }
            }
        }
    }

    /// Replace the faulted instance with a fresh follower loaded from the store
    fn recover(&mut self) -> Result<()> {
        let node = self
            .node
            .take()
            .ok_or_else(|| TicketRaftError::Internal(format!("{} has no node", self.id)))?;
        let (store, mut state_machine) = node.into_core().into_parts();
        state_machine.reset();

        let core = RaftCore::load(
            self.id,
            store,
            state_machine,
            Arc::clone(&self.transport),
            self.config.clone(),
        )?;
        let mut node = RaftNode::new(core);
        if self.started {
            node.start();
        }
        self.restarts += 1;
        tracing::warn!(node = %self.id, restarts = self.restarts, term = node.term(), "restarted after failure");
        self.node = Some(node);
        Ok(())
    }

    fn node(&self) -> Result<&RaftNode<S>> {
        self.node
            .as_ref()
            .ok_or_else(|| TicketRaftError::Internal(format!("{} has no node", self.id)))
    }

    fn node_mut(&mut self) -> Result<&mut RaftNode<S>> {
        self.node
            .as_mut()
            .ok_or_else(|| TicketRaftError::Internal(format!("{} has no node", self.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogEntry;
    use crate::message::{AppendEntries, Diagnostic, NodeStateReport, PeerMessage, RequestVote};
    use crate::network::LocalNetwork;
    use crate::storage::MemoryStore;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use ticketraft_core::{Behavior, ClientId};
    use ticketraft_statemachine::{Command, TicketCounter};

    fn spawn_server(
        network: &Arc<LocalNetwork<i64>>,
        id: u64,
        tickets: i64,
    ) -> JoinHandle<Result<()>> {
        let id = NodeId::new(id);
        let inbox = network.register_node(id);
        RaftServer::new(
            id,
            inbox,
            TicketCounter::new(tickets),
            Box::new(MemoryStore::new()),
            network.clone(),
            RaftConfig::default(),
        )
        .unwrap()
        .spawn()
    }

    async fn ask<T>(
        network: &LocalNetwork<i64>,
        id: u64,
        make: impl FnOnce(oneshot::Sender<T>) -> Diagnostic<i64>,
    ) -> T {
        let (tx, rx) = oneshot::channel();
        network.send(NodeId::new(id), make(tx).into());
        rx.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_resets_volatile_state() {
        let network = Arc::new(LocalNetwork::<i64>::new());
        let handle = spawn_server(&network, 1, 5);
        network.send(NodeId::new(1), ControlMessage::SetPeers(vec![NodeId::new(0)]).into());

        network.send(
            NodeId::new(1),
            PeerMessage::AppendEntries(AppendEntries {
                term: 1,
                leader_id: NodeId::new(0),
                prev_log_index: -1,
                prev_log_term: -1,
                entries: vec![LogEntry::new(1, Command::decrement(ClientId::new(1), 1, 1))],
                leader_commit: 1,
            })
            .into(),
        );
        assert_eq!(ask(&network, 1, Diagnostic::GetStateMachineState).await, 4);

        network.send(NodeId::new(1), ControlMessage::Failure.into());
        assert_eq!(ask(&network, 1, Diagnostic::GetStateMachineState).await, 5);

        let state: NodeStateReport = ask(&network, 1, Diagnostic::GetState).await;
        assert_eq!(state.commit_index, -1);
        assert_eq!(state.last_applied, -1);
        assert_eq!(state.current_term, 1);
        assert_eq!(state.log.len(), 1);
        assert_eq!(
            ask(&network, 1, Diagnostic::GetBehavior).await,
            Behavior::Follower
        );

        network.send(NodeId::new(1), ControlMessage::ShutDown.into());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_persisted_vote() {
        let network = Arc::new(LocalNetwork::<i64>::new());
        let handle = spawn_server(&network, 1, 5);
        network.send(
            NodeId::new(1),
            ControlMessage::SetPeers(vec![NodeId::new(0), NodeId::new(2)]).into(),
        );

        network.send(
            NodeId::new(1),
            PeerMessage::RequestVote(RequestVote {
                term: 2,
                candidate_id: NodeId::new(2),
                last_log_index: -1,
                last_log_term: -1,
            })
            .into(),
        );
        let before: NodeStateReport = ask(&network, 1, Diagnostic::GetState).await;
        assert_eq!(before.current_term, 2);
        assert_eq!(before.voted_for, Some(NodeId::new(2)));

        network.send(NodeId::new(1), ControlMessage::Failure.into());
        let after: NodeStateReport = ask(&network, 1, Diagnostic::GetState).await;
        assert_eq!(after.current_term, 2);
        assert_eq!(after.voted_for, Some(NodeId::new(2)));
        assert_eq!(after.commit_index, -1);

        network.send(NodeId::new(1), ControlMessage::ShutDown.into());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_server_becomes_leader_after_timeout() {
        let network = Arc::new(LocalNetwork::<i64>::new());
        let handle = spawn_server(&network, 0, 5);
        network.send(NodeId::new(0), ControlMessage::Start.into());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(
            ask(&network, 0, Diagnostic::GetBehavior).await,
            Behavior::Leader
        );
        assert_eq!(ask(&network, 0, |tx| Diagnostic::GetState(tx)).await.current_term, 1);

        network.send(NodeId::new(0), ControlMessage::ShutDown.into());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_leader_returns_as_follower_and_rejoins() {
        let network = Arc::new(LocalNetwork::<i64>::new());
        let handle = spawn_server(&network, 0, 5);
        network.send(NodeId::new(0), ControlMessage::Start.into());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(
            ask(&network, 0, Diagnostic::GetBehavior).await,
            Behavior::Leader
        );

        network.send(NodeId::new(0), ControlMessage::Failure.into());
        assert_eq!(
            ask(&network, 0, Diagnostic::GetBehavior).await,
            Behavior::Follower
        );

        // the restarted follower keeps its election timer and wins again
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(
            ask(&network, 0, Diagnostic::GetBehavior).await,
            Behavior::Leader
        );
        assert_eq!(ask(&network, 0, Diagnostic::GetState).await.current_term, 2);

        network.send(NodeId::new(0), ControlMessage::ShutDown.into());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_closed_inbox_stops_server() {
        let network = Arc::new(LocalNetwork::<i64>::new());
        let handle = spawn_server(&network, 3, 5);
        network.deregister_node(NodeId::new(3));
        handle.await.unwrap().unwrap();
    }
}
