//! Candidate role

use crate::core::RaftCore;
use crate::message::{
    AppendEntriesResponse, ClientRequest, PeerMessage, RequestVoteResponse,
};
use crate::node::Transition;
use crate::pending::PendingRequests;
use ticketraft_core::Result;
use ticketraft_statemachine::StateMachine;

/// Votes needed to win, not counting the candidate's own vote: half the peers
/// when the peer count is even, half plus one when it is odd.
pub fn votes_required(peer_count: usize) -> usize {
    if peer_count % 2 == 0 {
        peer_count / 2
    } else {
        peer_count / 2 + 1
    }
}

/// Collects votes for the current term.
#[derive(Debug)]
pub struct Candidate {
    pub(crate) votes_received: usize,
    pub(crate) votes_required: usize,
    pending: PendingRequests,
}

impl Candidate {
    /// Enter the role right after the vote requests went out
    pub fn enter<S: StateMachine>(core: &mut RaftCore<S>) -> Result<Self> {
        core.persist_term()?;
        core.persist_peers()?;
        core.start_election_timer();

        let votes_required = votes_required(core.peers.len());
        tracing::info!(
            node = %core.id,
            term = core.current_term,
            votes_required,
            "became candidate"
        );
        Ok(Self {
            votes_received: 0,
            votes_required,
            pending: PendingRequests::new(),
        })
    }

    pub fn has_quorum(&self) -> bool {
        self.votes_received >= self.votes_required
    }

    pub fn on_peer<S: StateMachine>(
        &mut self,
        core: &mut RaftCore<S>,
        msg: PeerMessage,
    ) -> Result<Transition> {
        match msg {
            PeerMessage::AppendEntries(ae) => {
                if ae.term < core.current_term {
                    core.send(
                        ae.leader_id,
                        PeerMessage::AppendEntriesResponse(AppendEntriesResponse {
                            sender: core.id,
                            term: core.current_term,
                            success: false,
                            match_index: ae.prev_log_index + ae.entries.len() as i64,
                        }),
                    );
                    return Ok(Transition::Stay);
                }
                tracing::info!(node = %core.id, leader = %ae.leader_id, term = ae.term, "leader found, abandoning election");
                self.pending.flush(core.transport(), ae.leader_id);
                Ok(Transition::StepDown(Some(PeerMessage::AppendEntries(ae))))
            }
            PeerMessage::RequestVote(rv) => {
                if rv.term > core.current_term {
                    core.observe_term(rv.term)?;
                    self.pending.flush(core.transport(), core.id);
                    return Ok(Transition::StepDown(Some(PeerMessage::RequestVote(rv))));
                }
                core.send(
                    rv.candidate_id,
                    PeerMessage::RequestVoteResponse(RequestVoteResponse {
                        term: core.current_term,
                        vote_granted: false,
                    }),
                );
                Ok(Transition::Stay)
            }
            PeerMessage::RequestVoteResponse(response) => self.on_vote(core, response),
            PeerMessage::AppendEntriesResponse(_) => Ok(Transition::Stay),
        }
    }

    fn on_vote<S: StateMachine>(
        &mut self,
        core: &mut RaftCore<S>,
        response: RequestVoteResponse,
    ) -> Result<Transition> {
        if response.term > core.current_term {
            core.observe_term(response.term)?;
            self.pending.flush(core.transport(), core.id);
            return Ok(Transition::StepDown(None));
        }
        if response.term < core.current_term {
            tracing::trace!(node = %core.id, term = response.term, "ignoring vote from an earlier round");
            return Ok(Transition::Stay);
        }
        if response.vote_granted {
            self.votes_received += 1;
            tracing::debug!(
                node = %core.id,
                received = self.votes_received,
                required = self.votes_required,
                "vote received"
            );
        }
        if self.has_quorum() {
            self.pending.flush(core.transport(), core.id);
            return Ok(Transition::Lead);
        }
        Ok(Transition::Stay)
    }

    pub fn on_client<S: StateMachine>(&mut self, core: &mut RaftCore<S>, request: ClientRequest) {
        match request {
            ClientRequest::UnstableRead { client } => core.answer_unstable_read(client),
            request => self.pending.push(request),
        }
    }

    pub fn on_timeout<S: StateMachine>(&mut self, core: &mut RaftCore<S>) -> Result<Transition> {
        tracing::info!(node = %core.id, term = core.current_term, "election timed out, starting another round");
        core.on_election_timeout()?;
        self.votes_received = 0;
        core.start_election_timer();
        Ok(Transition::Stay)
    }

    /// Send buffered requests to self before the node becomes leader
    pub fn release_pending<S: StateMachine>(&mut self, core: &RaftCore<S>) {
        self.pending.flush(core.transport(), core.id);
    }
}
