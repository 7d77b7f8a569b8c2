//! Client session
//!
//! A session walks through a queue of requests, one outstanding at a time. It
//! prefers one server; when that server stops answering it is benched for the
//! retry period and the other servers are tried round-robin. Any response or
//! request timeout restarts the request timer.

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use ticketraft_core::{ClientConfig, ClientId, CommandId, NodeId};
use ticketraft_raft::{wait_until, ClientMessage, QueuedRequest, Transport};
use ticketraft_statemachine::ReadState;

/// Why a session ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every queued request was answered or sent
    Completed,
    /// A read reported no tickets left
    TicketsExhausted,
    /// The leader refused an update
    UpdateRejected,
    /// Stopped from outside before finishing
    ShutDown,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::TicketsExhausted => write!(f, "tickets exhausted"),
            Self::UpdateRejected => write!(f, "update rejected"),
            Self::ShutDown => write!(f, "shut down"),
        }
    }
}

/// Summary returned when a session task exits
#[derive(Clone, Debug, PartialEq)]
pub struct SessionReport<St> {
    pub client: ClientId,
    pub outcome: SessionOutcome,
    pub requests_sent: usize,
    pub timeouts: usize,
    pub updates_committed: usize,
    pub last_read: Option<St>,
}

pub struct ClientSession<St> {
    id: ClientId,
    servers: Vec<NodeId>,
    preferred: NodeId,
    next_server_index: usize,
    preferred_active: bool,
    retrying_preferred: bool,

    queue: Vec<QueuedRequest>,
    next_request: usize,

    config: ClientConfig,
    transport: Arc<dyn Transport<St>>,
    request_deadline: Option<Instant>,
    retry_deadline: Option<Instant>,

    outcome: Option<SessionOutcome>,
    requests_sent: usize,
    timeouts: usize,
    updates_committed: usize,
    last_read: Option<St>,
}

impl<St> ClientSession<St>
where
    St: ReadState + Clone + fmt::Debug + Send + 'static,
{
    pub fn new(
        id: ClientId,
        servers: Vec<NodeId>,
        preferred: NodeId,
        config: ClientConfig,
        transport: Arc<dyn Transport<St>>,
    ) -> Self {
        Self {
            id,
            servers,
            preferred,
            next_server_index: 0,
            preferred_active: true,
            retrying_preferred: false,
            queue: Vec::new(),
            next_request: 0,
            config,
            transport,
            request_deadline: None,
            retry_deadline: None,
            outcome: None,
            requests_sent: 0,
            timeouts: 0,
            updates_committed: 0,
            last_read: None,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Drive the session from `inbox` until it finishes
    pub async fn run(mut self, mut inbox: UnboundedReceiver<ClientMessage<St>>) -> SessionReport<St> {
        while !self.is_finished() {
            let request_deadline = self.request_deadline;
            let retry_deadline = self.retry_deadline;
            tokio::select! {
                biased;

                msg = inbox.recv() => match msg {
                    Some(msg) => self.on_message(msg),
                    None => self.finish(SessionOutcome::ShutDown),
                },
                _ = wait_until(request_deadline) => self.on_request_timeout(),
                _ = wait_until(retry_deadline) => self.on_retry_timeout(),
            }
        }
        self.report()
    }

    pub fn report(&self) -> SessionReport<St> {
        SessionReport {
            client: self.id,
            outcome: self.outcome.unwrap_or(SessionOutcome::ShutDown),
            requests_sent: self.requests_sent,
            timeouts: self.timeouts,
            updates_committed: self.updates_committed,
            last_read: self.last_read.clone(),
        }
    }

    pub fn on_message(&mut self, msg: ClientMessage<St>) {
        match msg {
            ClientMessage::Start => {
                tracing::debug!(client = %self.id, preferred = %self.preferred, queued = self.queue.len(), "session started");
                self.send_next_request();
                self.start_request_timer();
            }
            ClientMessage::SetRequestQueue(requests) => self.queue.extend(requests),
            ClientMessage::UpdateResponse { success, command_id } => {
                self.on_update_response(success, command_id)
            }
            ClientMessage::CommittedReadResponse { state } => self.on_read_response(state, "committed"),
            ClientMessage::UnstableReadResponse { state } => self.on_read_response(state, "unstable"),
            ClientMessage::ShutDown => self.finish(SessionOutcome::ShutDown),
        }
    }

    fn current(&self) -> Option<&QueuedRequest> {
        self.queue.get(self.next_request)
    }

    fn on_update_response(&mut self, success: bool, command_id: CommandId) {
        // any response counts as progress for the request timer
        self.start_request_timer();
        let expected = matches!(self.current(), Some(QueuedRequest::Update(command)) if command.id == command_id);
        if !expected {
            tracing::debug!(client = %self.id, command_id, "ignoring response for another request");
            return;
        }

        if success {
            self.updates_committed += 1;
            tracing::debug!(client = %self.id, command_id, "update committed");
            self.next_request += 1;
            self.send_next_request();
        } else {
            tracing::info!(client = %self.id, command_id, "update rejected, stopping requests");
            self.finish(SessionOutcome::UpdateRejected);
        }
    }

    fn on_read_response(&mut self, state: St, kind: &'static str) {
        self.start_request_timer();
        let expected = matches!(
            self.current(),
            Some(QueuedRequest::CommittedRead | QueuedRequest::UnstableRead)
        );
        if !expected {
            tracing::debug!(client = %self.id, kind, "ignoring read response for another request");
            return;
        }

        let exhausted = state.is_exhausted();
        tracing::info!(client = %self.id, kind, state = ?state, "read response");
        self.last_read = Some(state);
        if exhausted {
            tracing::info!(client = %self.id, "no tickets left, stopping requests");
            self.finish(SessionOutcome::TicketsExhausted);
        } else {
            self.next_request += 1;
            self.send_next_request();
        }
    }

    pub fn on_request_timeout(&mut self) {
        self.request_deadline = None;
        self.timeouts += 1;
        tracing::debug!(client = %self.id, "request timed out");

        if self.preferred_active && !self.retrying_preferred {
            tracing::info!(client = %self.id, preferred = %self.preferred, "preferred server unresponsive, benching it");
            self.preferred_active = false;
            self.retry_deadline = Some(Instant::now() + self.config.preferred_retry_timeout);
        } else {
            self.next_server_index += 1;
        }
        self.send_next_request();
        self.retrying_preferred = false;
        self.start_request_timer();
    }

    pub fn on_retry_timeout(&mut self) {
        self.retry_deadline = None;
        tracing::info!(client = %self.id, preferred = %self.preferred, "retrying preferred server");
        self.preferred_active = true;
        self.retrying_preferred = true;
    }

    fn send_next_request(&mut self) {
        let Some(request) = self.current().cloned() else {
            self.finish(SessionOutcome::Completed);
            return;
        };

        let target = if self.preferred_active {
            self.preferred
        } else {
            self.next_non_preferred().unwrap_or(self.preferred)
        };
        tracing::debug!(client = %self.id, to = %target, kind = request.kind(), "sending request");
        self.transport.send(target, request.to_message(self.id));
        self.requests_sent += 1;

        // The target is expected to crash, so no answer will come
        if request.is_failure() {
            self.next_request += 1;
        }
    }

    /// Round-robin over the servers, skipping the preferred one
    fn next_non_preferred(&mut self) -> Option<NodeId> {
        if self.servers.len() <= 1 {
            return None;
        }
        if self.next_server_index >= self.servers.len() {
            self.next_server_index = 0;
        }
        if self.servers[self.next_server_index] == self.preferred {
            self.next_server_index = (self.next_server_index + 1) % self.servers.len();
        }
        self.servers.get(self.next_server_index).copied()
    }

    fn start_request_timer(&mut self) {
        self.request_deadline = Some(Instant::now() + self.config.request_timeout);
    }

    fn finish(&mut self, outcome: SessionOutcome) {
        if self.outcome.is_some() {
            return;
        }
        tracing::info!(
            client = %self.id,
            outcome = %outcome,
            sent = self.requests_sent,
            timeouts = self.timeouts,
            "session finished"
        );
        self.outcome = Some(outcome);
        self.queue.clear();
        self.request_deadline = None;
        self.retry_deadline = None;
    }
}
