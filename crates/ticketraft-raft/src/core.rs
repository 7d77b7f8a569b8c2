//! State and behavior shared by every role
//!
//! [`RaftCore`] owns the persistent fields (term, vote, log, peers), the
//! volatile progress (commit index, last applied), the committed state machine
//! and its tentative projection, and the node's single timer slot. Roles borrow
//! it mutably while handling a message; switching roles never touches it.

use crate::log::{self, LogEntry};
use crate::message::{
    ClientMessage, NodeStateReport, PeerMessage, RaftMessage, RequestVote,
};
use crate::network::Transport;
use crate::storage::DurableStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use ticketraft_core::{ClientId, LogIndex, NodeId, RaftConfig, Result, Term, NONE};
use ticketraft_statemachine::{Command, StateMachine};

pub struct RaftCore<S: StateMachine> {
    pub(crate) id: NodeId,
    pub(crate) peers: Vec<NodeId>,

    // Persistent
    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<NodeId>,
    pub(crate) log: Vec<LogEntry>,

    // Volatile
    pub(crate) commit_index: LogIndex,
    pub(crate) last_applied: LogIndex,
    pub(crate) state_machine: S,
    pub(crate) tentative: S,

    pub(crate) config: RaftConfig,
    store: Box<dyn DurableStore>,
    transport: Arc<dyn Transport<S::State>>,
    rng: StdRng,

    /// Pending election or heartbeat timeout
    deadline: Option<Instant>,
}

impl<S: StateMachine> RaftCore<S> {
    /// Build a node from its durable store.
    ///
    /// Term, vote, log and peers come from the store. Volatile progress always
    /// starts at `-1` and the state machine is used as given, so a rebuilt node
    /// does not replay its log.
    pub fn load(
        id: NodeId,
        mut store: Box<dyn DurableStore>,
        state_machine: S,
        transport: Arc<dyn Transport<S::State>>,
        config: RaftConfig,
    ) -> Result<Self> {
        store.set_node_id(id);
        let current_term = store.current_term()?;
        let voted_for = store.voted_for()?;
        let log = store.log()?;
        let peers = store.peers()?;

        tracing::debug!(
            node = %id,
            term = current_term,
            log_len = log.len(),
            peers = peers.len(),
            "loaded persistent state"
        );

        let tentative = state_machine.fork();
        let mut core = Self {
            id,
            peers,
            current_term,
            voted_for,
            log,
            commit_index: NONE,
            last_applied: NONE,
            state_machine,
            tentative,
            config,
            store,
            transport,
            rng: StdRng::seed_from_u64(id.0),
            deadline: None,
        };
        core.update_tentative_state();
        Ok(core)
    }

    /// Hand back the store and committed state machine, dropping everything else
    pub fn into_parts(self) -> (Box<dyn DurableStore>, S) {
        (self.store, self.state_machine)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    // Timers

    /// Arm the election timer: base plus a random share of the jitter window
    pub fn start_election_timer(&mut self) {
        let jitter_ms = self.config.election_timeout_jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..jitter_ms)
        };
        let timeout = self.config.election_timeout_base + Duration::from_millis(extra);
        self.deadline = Some(Instant::now() + timeout);
    }

    pub fn start_heartbeat_timer(&mut self) {
        self.deadline = Some(Instant::now() + self.config.heartbeat_interval);
    }

    pub fn cancel_timer(&mut self) {
        self.deadline = None;
    }

    // Messaging

    pub fn send(&self, to: NodeId, msg: impl Into<RaftMessage<S::State>>) {
        self.transport.send(to, msg.into());
    }

    pub fn send_to_self(&self, msg: impl Into<RaftMessage<S::State>>) {
        self.transport.send(self.id, msg.into());
    }

    pub fn reply(&self, to: ClientId, msg: ClientMessage<S::State>) {
        self.transport.reply(to, msg);
    }

    pub fn transport(&self) -> &dyn Transport<S::State> {
        self.transport.as_ref()
    }

    // Persistent state

    /// Adopt a newer term seen in a message. Returns whether the term advanced.
    /// The vote is cleared whenever the term moves forward.
    pub fn observe_term(&mut self, term: Term) -> Result<bool> {
        if term <= self.current_term {
            return Ok(false);
        }
        tracing::debug!(node = %self.id, from = self.current_term, to = term, "adopting newer term");
        self.current_term = term;
        self.voted_for = None;
        self.store.save_current_term(term)?;
        self.store.save_voted_for(None)?;
        Ok(true)
    }

    pub fn set_voted_for(&mut self, voted_for: Option<NodeId>) -> Result<()> {
        if self.voted_for != voted_for {
            self.voted_for = voted_for;
            self.store.save_voted_for(voted_for)?;
        }
        Ok(())
    }

    pub fn persist_term(&mut self) -> Result<()> {
        self.store.save_current_term(self.current_term)
    }

    pub fn persist_log(&mut self) -> Result<()> {
        self.store.save_log(&self.log)
    }

    pub fn set_peers(&mut self, peers: Vec<NodeId>) -> Result<()> {
        self.peers = peers.into_iter().filter(|p| *p != self.id).collect();
        self.store.save_peers(&self.peers)
    }

    pub fn persist_peers(&mut self) -> Result<()> {
        self.store.save_peers(&self.peers)
    }

    /// Append entries locally without replication
    pub fn save_entries(&mut self, entries: Vec<LogEntry>) -> Result<()> {
        self.log.extend(entries);
        self.persist_log()?;
        self.update_tentative_state();
        Ok(())
    }

    // Elections

    /// Start a new election round: next term, vote for self, ask every peer
    pub fn on_election_timeout(&mut self) -> Result<()> {
        self.current_term += 1;
        self.store.save_current_term(self.current_term)?;
        self.voted_for = Some(self.id);
        self.store.save_voted_for(self.voted_for)?;

        tracing::info!(node = %self.id, term = self.current_term, "election timeout, requesting votes");

        let request = PeerMessage::RequestVote(RequestVote {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        });
        for peer in &self.peers {
            self.send(*peer, request.clone());
        }
        Ok(())
    }

    // Log and state machine

    pub fn last_log_index(&self) -> LogIndex {
        log::last_index(&self.log)
    }

    pub fn last_log_term(&self) -> Term {
        log::last_term(&self.log)
    }

    pub fn is_log_fully_committed(&self) -> bool {
        self.commit_index >= self.last_log_index()
    }

    /// Apply entries `last_applied + 1 ..= commit_index` in order
    pub fn apply_committed_entries(&mut self) {
        if self.commit_index <= self.last_applied {
            return;
        }
        let from = (self.last_applied + 1) as usize;
        let to = (self.commit_index + 1) as usize;
        for entry in &self.log[from..to] {
            self.state_machine.apply(&entry.command);
        }
        tracing::trace!(
            node = %self.id,
            from = self.last_applied + 1,
            to = self.commit_index,
            "applied committed entries"
        );
        self.last_applied = self.commit_index;
    }

    /// Recompute the tentative state: committed state plus every uncommitted entry
    pub fn update_tentative_state(&mut self) {
        let mut tentative = self.state_machine.fork();
        for entry in log::suffix(&self.log, self.commit_index + 1) {
            tentative.apply(&entry.command);
        }
        self.tentative = tentative;
    }

    /// Whether a command with the same `(client, id)` is already in the log
    pub fn is_duplicate(&self, command: &Command) -> bool {
        self.log.iter().any(|entry| entry.command == *command)
    }

    /// Answer an unstable read from local state without consulting peers
    pub fn answer_unstable_read(&self, client: ClientId) {
        let state = if self.is_log_fully_committed() {
            self.state_machine.state()
        } else {
            self.tentative.state()
        };
        self.reply(client, ClientMessage::UnstableReadResponse { state });
    }

    pub fn report(&self) -> NodeStateReport {
        NodeStateReport {
            current_term: self.current_term,
            voted_for: self.voted_for,
            log: self.log.clone(),
            commit_index: self.commit_index,
            last_applied: self.last_applied,
        }
    }
}
