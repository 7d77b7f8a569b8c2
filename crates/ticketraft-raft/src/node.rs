//! Role dispatch
//!
//! A [`RaftNode`] is one server instance: the shared [`RaftCore`] plus the
//! role currently active. Handlers return a [`Transition`]; the node swaps the
//! role in place, so identity, inbox and volatile progress survive the swap.

use crate::candidate::Candidate;
use crate::core::RaftCore;
use crate::follower::Follower;
use crate::leader::Leader;
use crate::message::{ClientRequest, ControlMessage, Diagnostic, PeerMessage, RaftMessage};
use tokio::time::Instant;
use ticketraft_core::{Behavior, Result, Term};
use ticketraft_statemachine::StateMachine;

/// Role change requested by a handler
#[derive(Debug)]
pub enum Transition {
    Stay,
    /// Become a follower, then hand it the message that caused the step-down
    StepDown(Option<PeerMessage>),
    /// Follower election timeout: become a candidate
    Campaign,
    /// Candidate won: become leader
    Lead,
}

#[derive(Debug)]
enum Role {
    Follower(Follower),
    Candidate(Candidate),
    Leader(Leader),
}

/// What the surrounding task should do after a message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Running,
    /// Injected fault: discard this instance and rebuild from the store
    Crashed,
    Stopped,
}

pub struct RaftNode<S: StateMachine> {
    core: RaftCore<S>,
    role: Role,
}

impl<S: StateMachine> RaftNode<S> {
    /// New instance in the follower role with no timer armed
    pub fn new(core: RaftCore<S>) -> Self {
        Self {
            core,
            role: Role::Follower(Follower::new()),
        }
    }

    pub fn into_core(self) -> RaftCore<S> {
        self.core
    }

    pub fn behavior(&self) -> Behavior {
        match self.role {
            Role::Follower(_) => Behavior::Follower,
            Role::Candidate(_) => Behavior::Candidate,
            Role::Leader(_) => Behavior::Leader,
        }
    }

    pub fn term(&self) -> Term {
        self.core.current_term
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.core.deadline()
    }

    /// Arm the election timer
    pub fn start(&mut self) {
        self.core.start_election_timer();
    }

    /// Handle one inbox message
    pub fn step(&mut self, msg: RaftMessage<S::State>) -> Result<Outcome> {
        match msg {
            RaftMessage::Peer(msg) => {
                let transition = self.on_peer(msg)?;
                self.apply(transition)?;
            }
            RaftMessage::Client(request) => self.on_client(request)?,
            RaftMessage::Control(control) => return self.on_control(control),
            RaftMessage::Diagnostic(diagnostic) => self.on_diagnostic(diagnostic)?,
        }
        Ok(Outcome::Running)
    }

    /// The armed timer fired
    pub fn on_timeout(&mut self) -> Result<()> {
        self.core.cancel_timer();
        let transition = match &mut self.role {
            Role::Follower(f) => f.on_timeout(&mut self.core)?,
            Role::Candidate(c) => c.on_timeout(&mut self.core)?,
            Role::Leader(l) => l.on_timeout(&mut self.core)?,
        };
        self.apply(transition)
    }

    fn on_peer(&mut self, msg: PeerMessage) -> Result<Transition> {
        match &mut self.role {
            Role::Follower(f) => f.on_peer(&mut self.core, msg),
            Role::Candidate(c) => c.on_peer(&mut self.core, msg),
            Role::Leader(l) => l.on_peer(&mut self.core, msg),
        }
    }

    fn on_client(&mut self, request: ClientRequest) -> Result<()> {
        match &mut self.role {
            Role::Follower(f) => f.on_client(&mut self.core, request),
            Role::Candidate(c) => c.on_client(&mut self.core, request),
            Role::Leader(l) => l.on_client(&mut self.core, request)?,
        }
        Ok(())
    }

    fn on_control(&mut self, control: ControlMessage) -> Result<Outcome> {
        match control {
            ControlMessage::Start => {
                if matches!(self.role, Role::Follower(_)) {
                    self.start();
                }
            }
            ControlMessage::SetPeers(peers) => {
                self.core.set_peers(peers)?;
                if let Role::Leader(l) = &mut self.role {
                    l.reset_progress(&self.core);
                }
            }
            ControlMessage::Failure => {
                tracing::warn!(node = %self.core.id, behavior = %self.behavior(), "injected failure");
                return Ok(Outcome::Crashed);
            }
            ControlMessage::ShutDown => {
                self.core.cancel_timer();
                return Ok(Outcome::Stopped);
            }
        }
        Ok(Outcome::Running)
    }

    fn on_diagnostic(&mut self, diagnostic: Diagnostic<S::State>) -> Result<()> {
        // A dropped receiver only means the asker stopped waiting
        match diagnostic {
            Diagnostic::GetState(tx) => {
                let _ = tx.send(self.core.report());
            }
            Diagnostic::GetLog(tx) => {
                let _ = tx.send(self.core.log.clone());
            }
            Diagnostic::GetCommitIndex(tx) => {
                let _ = tx.send(self.core.commit_index);
            }
            Diagnostic::GetStateMachineState(tx) => {
                let _ = tx.send(self.core.state_machine.state());
            }
            Diagnostic::GetBehavior(tx) => {
                let _ = tx.send(self.behavior());
            }
            Diagnostic::SaveEntries(entries) => {
                self.core.save_entries(entries)?;
                if let Role::Leader(l) = &mut self.role {
                    l.reset_progress(&self.core);
                }
            }
        }
        Ok(())
    }

    /// Carry out role changes until the node settles
    fn apply(&mut self, transition: Transition) -> Result<()> {
        let mut next = transition;
        loop {
            next = match next {
                Transition::Stay => return Ok(()),
                Transition::StepDown(redeliver) => {
                    tracing::info!(node = %self.core.id, from = %self.behavior(), term = self.core.current_term, "stepping down to follower");
                    let mut follower = Follower::new();
                    self.core.start_election_timer();
                    let next = match redeliver {
                        Some(msg) => follower.on_peer(&mut self.core, msg)?,
                        None => Transition::Stay,
                    };
                    self.role = Role::Follower(follower);
                    next
                }
                Transition::Campaign => {
                    let mut candidate = Candidate::enter(&mut self.core)?;
                    let next = if candidate.has_quorum() {
                        candidate.release_pending(&self.core);
                        Transition::Lead
                    } else {
                        Transition::Stay
                    };
                    self.role = Role::Candidate(candidate);
                    next
                }
                Transition::Lead => {
                    self.role = Role::Leader(Leader::enter(&mut self.core)?);
                    Transition::Stay
                }
            };
        }
    }
}
