//! Leader role

use crate::core::RaftCore;
use crate::log::{self, LogEntry};
use crate::message::{
    AppendEntries, AppendEntriesResponse, ClientMessage, ClientRequest, PeerMessage,
    RequestVoteResponse,
};
use crate::node::Transition;
use std::collections::HashMap;
use ticketraft_core::{LogIndex, NodeId, Result, NONE};
use ticketraft_statemachine::{Command, StateMachine};

/// Accepts client updates and replicates the log to every peer.
#[derive(Debug)]
pub struct Leader {
    /// Next log index to send to each peer
    pub(crate) next_index: HashMap<NodeId, LogIndex>,
    /// Highest index known to be replicated on each peer
    pub(crate) match_index: HashMap<NodeId, LogIndex>,
}

impl Leader {
    /// Take over: reset replication progress, announce with a heartbeat and arm
    /// the heartbeat timer
    pub fn enter<S: StateMachine>(core: &mut RaftCore<S>) -> Result<Self> {
        let mut leader = Self {
            next_index: HashMap::new(),
            match_index: HashMap::new(),
        };
        leader.reset_progress(core);
        leader.send_heartbeats(core);
        core.persist_term()?;
        core.persist_peers()?;
        core.start_heartbeat_timer();

        tracing::info!(node = %core.id, term = core.current_term, "became leader");
        Ok(leader)
    }

    /// `next_index = log length` and `match_index = -1` for every peer
    pub fn reset_progress<S: StateMachine>(&mut self, core: &RaftCore<S>) {
        let next = core.log.len() as LogIndex;
        self.next_index = core.peers.iter().map(|p| (*p, next)).collect();
        self.match_index = core.peers.iter().map(|p| (*p, NONE)).collect();
    }

    fn send_heartbeats<S: StateMachine>(&self, core: &RaftCore<S>) {
        let heartbeat = PeerMessage::AppendEntries(AppendEntries {
            term: core.current_term,
            leader_id: core.id,
            prev_log_index: NONE,
            prev_log_term: NONE,
            entries: Vec::new(),
            leader_commit: core.commit_index,
        });
        for peer in &core.peers {
            core.send(*peer, heartbeat.clone());
        }
    }

    /// Send everything from `next_index[peer]` to the end of the log
    fn replicate_to<S: StateMachine>(&self, core: &RaftCore<S>, peer: NodeId) {
        let next = self
            .next_index
            .get(&peer)
            .copied()
            .unwrap_or(core.log.len() as LogIndex);
        let prev_log_index = next - 1;
        core.send(
            peer,
            PeerMessage::AppendEntries(AppendEntries {
                term: core.current_term,
                leader_id: core.id,
                prev_log_index,
                prev_log_term: log::term_at(&core.log, prev_log_index),
                entries: log::suffix(&core.log, next).to_vec(),
                leader_commit: core.commit_index,
            }),
        );
    }

    pub fn on_peer<S: StateMachine>(
        &mut self,
        core: &mut RaftCore<S>,
        msg: PeerMessage,
    ) -> Result<Transition> {
        if msg.term() > core.current_term {
            tracing::info!(node = %core.id, term = core.current_term, seen = msg.term(), "newer term seen, stepping down");
            core.observe_term(msg.term())?;
            let redeliver = match msg {
                PeerMessage::AppendEntries(_) | PeerMessage::RequestVote(_) => Some(msg),
                _ => None,
            };
            return Ok(Transition::StepDown(redeliver));
        }

        match msg {
            PeerMessage::AppendEntries(ae) => {
                core.send(
                    ae.leader_id,
                    PeerMessage::AppendEntriesResponse(AppendEntriesResponse {
                        sender: core.id,
                        term: core.current_term,
                        success: false,
                        match_index: ae.prev_log_index + ae.entries.len() as i64,
                    }),
                );
            }
            PeerMessage::RequestVote(rv) => {
                core.send(
                    rv.candidate_id,
                    PeerMessage::RequestVoteResponse(RequestVoteResponse {
                        term: core.current_term,
                        vote_granted: false,
                    }),
                );
            }
            PeerMessage::AppendEntriesResponse(response) => {
                self.on_append_entries_response(core, response)?
            }
            PeerMessage::RequestVoteResponse(_) => {}
        }
        Ok(Transition::Stay)
    }

    fn on_append_entries_response<S: StateMachine>(
        &mut self,
        core: &mut RaftCore<S>,
        response: AppendEntriesResponse,
    ) -> Result<()> {
        let peer = response.sender;
        if !self.next_index.contains_key(&peer) {
            tracing::debug!(node = %core.id, peer = %peer, "response from unknown peer");
            return Ok(());
        }

        if response.success {
            let matched = self.match_index.entry(peer).or_insert(NONE);
            if response.match_index > *matched {
                *matched = response.match_index;
            }
            let next = self.next_index.entry(peer).or_insert(0);
            *next = (*next).max(response.match_index + 1);

            if self.is_replicated(core, response.match_index) {
                self.advance_commit_index(core, response.match_index);
            }
        } else {
            let next = self.next_index.entry(peer).or_insert(0);
            *next = (*next - 1).max(0);
            tracing::debug!(node = %core.id, peer = %peer, next_index = *next, "log mismatch, backing off");
            self.replicate_to(core, peer);
        }
        Ok(())
    }

    /// Whether `index` is on at least half of the peers
    fn is_replicated<S: StateMachine>(&self, core: &RaftCore<S>, index: LogIndex) -> bool {
        let replicas = self.match_index.values().filter(|m| **m >= index).count();
        replicas >= core.peers.len() / 2
    }

    /// Commit through `index`, apply, and tell each client its update committed
    fn advance_commit_index<S: StateMachine>(&self, core: &mut RaftCore<S>, index: LogIndex) {
        let index = index.min(core.last_log_index());
        if index <= core.commit_index {
            return;
        }
        let previously_applied = core.last_applied;
        core.commit_index = index;
        core.apply_committed_entries();
        core.update_tentative_state();

        tracing::debug!(node = %core.id, commit_index = index, "commit index advanced");

        let from = (previously_applied + 1) as usize;
        let to = (core.commit_index + 1) as usize;
        for entry in &core.log[from..to] {
            core.reply(
                entry.command.client,
                ClientMessage::UpdateResponse {
                    success: true,
                    command_id: entry.command.id,
                },
            );
        }
    }

    pub fn on_client<S: StateMachine>(
        &mut self,
        core: &mut RaftCore<S>,
        request: ClientRequest,
    ) -> Result<()> {
        match request {
            ClientRequest::Update { command, .. } => self.on_update(core, command)?,
            ClientRequest::CommittedRead { client } => {
                core.reply(
                    client,
                    ClientMessage::CommittedReadResponse {
                        state: core.state_machine.state(),
                    },
                );
            }
            ClientRequest::UnstableRead { client } => core.answer_unstable_read(client),
        }
        Ok(())
    }

    fn on_update<S: StateMachine>(&mut self, core: &mut RaftCore<S>, command: Command) -> Result<()> {
        if core.is_duplicate(&command) {
            tracing::trace!(node = %core.id, client = %command.client, id = command.id, "dropping duplicate update");
            return Ok(());
        }

        // Validate against the tentative state, so accepted but uncommitted updates count too
        let mut trial = core.tentative.fork();
        trial.apply(&command);
        if !trial.is_state_valid() {
            tracing::debug!(node = %core.id, client = %command.client, id = command.id, "rejecting update");
            core.reply(
                command.client,
                ClientMessage::UpdateResponse {
                    success: false,
                    command_id: command.id,
                },
            );
            return Ok(());
        }

        core.log.push(LogEntry::new(core.current_term, command));
        core.persist_log()?;
        core.update_tentative_state();

        if core.peers.is_empty() {
            let last = core.last_log_index();
            self.advance_commit_index(core, last);
            return Ok(());
        }
        for peer in &core.peers {
            self.replicate_to(core, *peer);
        }
        Ok(())
    }

    pub fn on_timeout<S: StateMachine>(&mut self, core: &mut RaftCore<S>) -> Result<Transition> {
        self.send_heartbeats(core);
        core.start_heartbeat_timer();
        Ok(Transition::Stay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::*;
    use crate::node::RaftNode;
    use crate::testing::{counter_node, list_node, RecordingTransport};
    use std::sync::Arc;
    use tokio::sync::oneshot;
    use ticketraft_core::{Behavior, ClientId};
    use ticketraft_statemachine::TicketCounter;

    /// Leader of term 1 over `peers`, with the election traffic cleared
    fn leader(peers: &[u64], tickets: i64) -> (RaftNode<TicketCounter>, Arc<RecordingTransport<i64>>) {
        let (mut node, transport) = counter_node(1, peers, tickets);
        node.on_timeout().unwrap();
        for _ in 0..peers.len() {
            node.step(
                PeerMessage::RequestVoteResponse(RequestVoteResponse {
                    term: 1,
                    vote_granted: true,
                })
                .into(),
            )
            .unwrap();
        }
        assert_eq!(node.behavior(), Behavior::Leader);
        transport.take_sent();
        (node, transport)
    }

    fn update(client: u64, id: u64, amount: i64) -> RaftMessage<i64> {
        let client = ClientId::new(client);
        ClientRequest::Update {
            client,
            command: Command::decrement(client, id, amount),
        }
        .into()
    }

    fn ack(peer: u64, match_index: i64) -> RaftMessage<i64> {
        PeerMessage::AppendEntriesResponse(AppendEntriesResponse {
            sender: NodeId::new(peer),
            term: 1,
            success: true,
            match_index,
        })
        .into()
    }

    fn commit_index(node: &mut RaftNode<TicketCounter>) -> i64 {
        let (tx, mut rx) = oneshot::channel();
        node.step(Diagnostic::GetCommitIndex(tx).into()).unwrap();
        rx.try_recv().unwrap()
    }

    #[test]
    fn test_update_replicates_and_commits_on_quorum() {
        let (mut node, transport) = leader(&[0, 2, 3, 4], 10);

        node.step(update(7, 1, 2)).unwrap();
        let appends = transport.take_peer_messages();
        assert_eq!(appends.len(), 4);
        for (_, msg) in &appends {
            match msg {
                PeerMessage::AppendEntries(ae) => {
                    assert_eq!(ae.prev_log_index, -1);
                    assert_eq!(ae.entries.len(), 1);
                    assert_eq!(ae.term, 1);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        // four peers: two acknowledgements commit
        node.step(ack(0, 0)).unwrap();
        assert_eq!(commit_index(&mut node), -1);
        node.step(ack(2, 0)).unwrap();
        assert_eq!(commit_index(&mut node), 0);

        assert_eq!(
            transport.take_replies(),
            vec![(
                ClientId::new(7),
                ClientMessage::UpdateResponse {
                    success: true,
                    command_id: 1
                }
            )]
        );

        let (tx, mut rx) = oneshot::channel();
        node.step(Diagnostic::GetStateMachineState(tx).into()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), 8);
    }

    #[test]
    fn test_rejects_update_that_would_go_negative() {
        let (mut node, transport) = leader(&[0, 2], 1);

        node.step(update(7, 1, 1)).unwrap();
        transport.take_sent();

        // one ticket is already spoken for by the uncommitted entry
        node.step(update(7, 2, 1)).unwrap();
        assert!(transport.take_sent().is_empty());
        assert_eq!(
            transport.take_replies(),
            vec![(
                ClientId::new(7),
                ClientMessage::UpdateResponse {
                    success: false,
                    command_id: 2
                }
            )]
        );

        let (tx, mut rx) = oneshot::channel();
        node.step(Diagnostic::GetLog(tx).into()).unwrap();
        assert_eq!(rx.try_recv().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicates_are_dropped_silently() {
        let (mut node, transport) = leader(&[0, 2], 5);
        node.step(update(7, 1, 1)).unwrap();
        transport.take_sent();

        node.step(update(7, 1, 1)).unwrap();
        assert!(transport.take_sent().is_empty());
        assert!(transport.take_replies().is_empty());
    }

    #[test]
    fn test_failed_append_backs_off_by_one() {
        let (mut node, transport) = leader(&[0, 2], 5);
        node.step(update(7, 1, 1)).unwrap();
        node.step(update(7, 2, 1)).unwrap();
        transport.take_sent();

        node.step(
            PeerMessage::AppendEntriesResponse(AppendEntriesResponse {
                sender: NodeId::new(2),
                term: 1,
                success: false,
                match_index: 1,
            })
            .into(),
        )
        .unwrap();

        let sent = transport.take_peer_messages();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            (to, PeerMessage::AppendEntries(ae)) => {
                assert_eq!(*to, NodeId::new(2));
                assert_eq!(ae.prev_log_index, -1);
                assert_eq!(ae.prev_log_term, -1);
                assert_eq!(ae.entries.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_reads_answered_locally() {
        let (mut node, transport) = leader(&[0, 2], 5);
        node.step(update(7, 1, 2)).unwrap();

        let client = ClientId::new(8);
        node.step(ClientRequest::CommittedRead { client }.into()).unwrap();
        node.step(ClientRequest::UnstableRead { client }.into()).unwrap();
        assert_eq!(
            transport.take_replies(),
            vec![
                (client, ClientMessage::CommittedReadResponse { state: 5 }),
                (client, ClientMessage::UnstableReadResponse { state: 3 }),
            ]
        );
    }

    #[test]
    fn test_heartbeat_timeout_keeps_leadership() {
        let (mut node, transport) = leader(&[0, 2], 5);
        node.on_timeout().unwrap();
        assert_eq!(node.behavior(), Behavior::Leader);
        let beats = transport.take_peer_messages();
        assert_eq!(beats.len(), 2);
        assert!(node.deadline().is_some());
    }

    #[test]
    fn test_steps_down_on_newer_term_only() {
        let (mut node, transport) = leader(&[0, 2], 5);
        let append = |term: i64| -> RaftMessage<i64> {
            PeerMessage::AppendEntries(AppendEntries {
                term,
                leader_id: NodeId::new(2),
                prev_log_index: -1,
                prev_log_term: -1,
                entries: vec![],
                leader_commit: -1,
            })
            .into()
        };

        node.step(append(1)).unwrap();
        assert_eq!(node.behavior(), Behavior::Leader);
        assert!(matches!(
            transport.take_peer_messages().as_slice(),
            [(_, PeerMessage::AppendEntriesResponse(r))] if !r.success
        ));

        node.step(append(3)).unwrap();
        assert_eq!(node.behavior(), Behavior::Follower);
        assert_eq!(node.term(), 3);
        assert!(matches!(
            transport.take_peer_messages().as_slice(),
            [(_, PeerMessage::AppendEntriesResponse(r))] if r.success
        ));
    }

    #[test]
    fn test_lone_leader_commits_immediately() {
        let (mut node, transport) = counter_node(0, &[], 3);
        node.on_timeout().unwrap();
        node.step(update(5, 1, 1)).unwrap();

        assert_eq!(commit_index(&mut node), 0);
        assert_eq!(
            transport.take_replies(),
            vec![(
                ClientId::new(5),
                ClientMessage::UpdateResponse {
                    success: true,
                    command_id: 1
                }
            )]
        );
    }

    #[test]
    fn test_save_entries_resets_next_index() {
        let (mut node, transport) = leader(&[0], 5);
        node.step(
            Diagnostic::SaveEntries(vec![
                LogEntry::new(1, Command::decrement(ClientId::new(1), 1, 1)),
                LogEntry::new(1, Command::decrement(ClientId::new(1), 2, 1)),
            ])
            .into(),
        )
        .unwrap();
        node.step(update(7, 9, 1)).unwrap();

        match transport.take_peer_messages().as_slice() {
            [(_, PeerMessage::AppendEntries(ae))] => {
                assert_eq!(ae.prev_log_index, 1);
                assert_eq!(ae.entries.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_command_list_keeps_commit_order() {
        let (mut node, transport) = list_node(0);
        node.on_timeout().unwrap();
        let client = ClientId::new(4);
        for (id, value) in [(1, "a"), (2, "b")] {
            node.step(
                ClientRequest::Update {
                    client,
                    command: Command::record(client, id, value),
                }
                .into(),
            )
            .unwrap();
        }
        node.step(ClientRequest::CommittedRead { client }.into())
            .unwrap();

        let replies = transport.take_replies();
        assert_eq!(replies.len(), 3);
        match &replies[2].1 {
            ClientMessage::CommittedReadResponse { state } => {
                let ids: Vec<u64> = state.iter().map(|c| c.id).collect();
                assert_eq!(ids, vec![1, 2]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
