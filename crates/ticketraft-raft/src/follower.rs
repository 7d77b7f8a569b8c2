//! Follower role

use crate::core::RaftCore;
use crate::log;
use crate::message::{
    AppendEntries, AppendEntriesResponse, ClientRequest, PeerMessage, RequestVote,
    RequestVoteResponse,
};
use crate::node::Transition;
use crate::pending::PendingRequests;
use ticketraft_core::{NodeId, Result};
use ticketraft_statemachine::StateMachine;

/// Accepts replication from the current leader and grants votes.
#[derive(Debug, Default)]
pub struct Follower {
    /// Leader that last sent a successful AppendEntries
    pub(crate) leader: Option<NodeId>,
    pending: PendingRequests,
}

impl Follower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_peer<S: StateMachine>(
        &mut self,
        core: &mut RaftCore<S>,
        msg: PeerMessage,
    ) -> Result<Transition> {
        match msg {
            PeerMessage::AppendEntries(ae) => self.on_append_entries(core, ae)?,
            PeerMessage::RequestVote(rv) => Self::on_request_vote(core, rv)?,
            PeerMessage::AppendEntriesResponse(_) | PeerMessage::RequestVoteResponse(_) => {
                tracing::trace!(node = %core.id, "follower ignores stray response");
            }
        }
        Ok(Transition::Stay)
    }

    fn on_append_entries<S: StateMachine>(
        &mut self,
        core: &mut RaftCore<S>,
        msg: AppendEntries,
    ) -> Result<()> {
        core.observe_term(msg.term)?;
        let match_index = msg.prev_log_index + msg.entries.len() as i64;

        if Self::rejects(core, &msg) {
            tracing::debug!(
                node = %core.id,
                leader = %msg.leader_id,
                term = msg.term,
                prev_log_index = msg.prev_log_index,
                "rejecting append entries"
            );
            Self::respond(core, msg.leader_id, false, match_index);
            return Ok(());
        }

        core.start_election_timer();
        log::splice(&mut core.log, msg.prev_log_index, &msg.entries);

        if msg.leader_commit > core.commit_index {
            let commit = msg.leader_commit.min(core.last_log_index());
            if commit > core.commit_index {
                core.commit_index = commit;
                core.apply_committed_entries();
            }
        }
        core.persist_log()?;
        core.update_tentative_state();

        if self.leader.is_none() {
            tracing::info!(node = %core.id, leader = %msg.leader_id, term = core.current_term, "following new leader");
            self.pending.flush(core.transport(), msg.leader_id);
        }
        self.leader = Some(msg.leader_id);
        core.set_voted_for(None)?;

        Self::respond(core, msg.leader_id, true, match_index);
        Ok(())
    }

    fn rejects<S: StateMachine>(core: &RaftCore<S>, msg: &AppendEntries) -> bool {
        if msg.term < core.current_term {
            return true;
        }
        if msg.prev_log_index == -1 {
            return false;
        }
        match log::entry_at(&core.log, msg.prev_log_index) {
            None => true,
            Some(entry) => entry.term != msg.prev_log_term,
        }
    }

    fn respond<S: StateMachine>(
        core: &RaftCore<S>,
        leader: NodeId,
        success: bool,
        match_index: i64,
    ) {
        core.send(
            leader,
            PeerMessage::AppendEntriesResponse(AppendEntriesResponse {
                sender: core.id,
                term: core.current_term,
                success,
                match_index,
            }),
        );
    }

    fn on_request_vote<S: StateMachine>(core: &mut RaftCore<S>, msg: RequestVote) -> Result<()> {
        core.observe_term(msg.term)?;

        let granted = !Self::denies_vote(core, &msg);
        if granted {
            core.start_election_timer();
            core.set_voted_for(Some(msg.candidate_id))?;
            tracing::info!(node = %core.id, candidate = %msg.candidate_id, term = core.current_term, "granting vote");
        } else {
            tracing::debug!(node = %core.id, candidate = %msg.candidate_id, term = msg.term, "denying vote");
        }

        core.send(
            msg.candidate_id,
            PeerMessage::RequestVoteResponse(RequestVoteResponse {
                term: core.current_term,
                vote_granted: granted,
            }),
        );
        Ok(())
    }

    fn denies_vote<S: StateMachine>(core: &RaftCore<S>, msg: &RequestVote) -> bool {
        if msg.term < core.current_term || core.voted_for.is_some() {
            return true;
        }
        if core.log.is_empty() {
            return false;
        }
        let last_term = core.last_log_term();
        msg.last_log_term < last_term
            || (msg.last_log_term == last_term && msg.last_log_index < core.last_log_index())
    }

    pub fn on_client<S: StateMachine>(&mut self, core: &mut RaftCore<S>, request: ClientRequest) {
        if let ClientRequest::UnstableRead { client } = request {
            core.answer_unstable_read(client);
            return;
        }
        match self.leader {
            Some(leader) => {
                tracing::trace!(node = %core.id, leader = %leader, client = %request.client(), "forwarding to leader");
                core.send(leader, request);
            }
            None => self.pending.push(request),
        }
    }

    pub fn on_timeout<S: StateMachine>(&mut self, core: &mut RaftCore<S>) -> Result<Transition> {
        core.on_election_timeout()?;
        self.pending.flush(core.transport(), core.id);
        Ok(Transition::Campaign)
    }
}
