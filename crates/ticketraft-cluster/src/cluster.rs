//! In-process cluster
//!
//! Spawns the servers and clients of a ticket-selling cluster on one tokio
//! runtime, wires their peer sets and request queues, and tears everything
//! down again.

use crate::workload::{request_queue, shuffled_servers};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use ticketraft_client::{ClientSession, SessionReport};
use ticketraft_core::{Behavior, ClientId, ClusterConfig, NodeId, Result, TicketRaftError};
use ticketraft_raft::{
    ClientMessage, ControlMessage, Diagnostic, DurableStore, LocalNetwork, MemoryStore,
    NodeStateReport, RaftServer, RocksDbStore, Transport,
};
use ticketraft_statemachine::TicketCounter;

/// Running servers and clients
pub struct Cluster {
    network: Arc<LocalNetwork<i64>>,
    servers: Vec<(NodeId, JoinHandle<Result<()>>)>,
    clients: Vec<(ClientId, JoinHandle<SessionReport<i64>>)>,
}

impl Cluster {
    /// Spawn and start a cluster. Must be called from within a tokio runtime.
    pub fn spawn(config: ClusterConfig) -> Result<Self> {
        config.validate()?;
        let network = Arc::new(LocalNetwork::<i64>::new());
        let server_ids: Vec<NodeId> = (0..config.servers as u64).map(NodeId::new).collect();

        let shared_db = match &config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Some(RocksDbStore::open(dir)?)
            }
            None => None,
        };

        tracing::info!(servers = config.servers, clients = config.clients, "spawning servers");
        let mut servers = Vec::with_capacity(server_ids.len());
        for id in &server_ids {
            let store: Box<dyn DurableStore> = match &shared_db {
                Some(db) => Box::new(db.handle()),
                None => Box::new(MemoryStore::new()),
            };
            let inbox = network.register_node(*id);
            let server = RaftServer::new(
                *id,
                inbox,
                TicketCounter::new(config.initial_tickets),
                store,
                network.clone(),
                config.raft.clone(),
            )?;
            servers.push((*id, server.spawn()));
        }

        for id in &server_ids {
            let others: Vec<NodeId> = server_ids.iter().copied().filter(|p| p != id).collect();
            network.send(*id, ControlMessage::SetPeers(others).into());
        }

        tracing::info!("spawning clients");
        let mut clients = Vec::with_capacity(config.clients);
        for i in 0..config.clients {
            let id = ClientId::new(i as u64);
            let preferred = server_ids[i % server_ids.len()];
            let session = ClientSession::new(
                id,
                shuffled_servers(&server_ids, i as u64),
                preferred,
                config.client.clone(),
                network.clone(),
            );
            let inbox = network.register_client(id);
            clients.push((id, tokio::spawn(session.run(inbox))));

            let failure_every = if i + 1 == config.clients {
                config.failure_every
            } else {
                None
            };
            let queue = request_queue(
                id,
                config.rounds_per_client,
                config.updates_per_round,
                failure_every,
            );
            network.reply(id, ClientMessage::SetRequestQueue(queue));
        }

        tracing::info!("starting servers");
        for id in &server_ids {
            network.send(*id, ControlMessage::Start.into());
        }
        tracing::info!("starting clients");
        for (id, _) in &clients {
            network.reply(*id, ClientMessage::Start);
        }

        Ok(Self {
            network,
            servers,
            clients,
        })
    }

    pub fn server_ids(&self) -> Vec<NodeId> {
        self.servers.iter().map(|(id, _)| *id).collect()
    }

    /// Wait until every client session has finished.
    ///
    /// Cancel-safe: clients not yet collected stay owned by the cluster and are
    /// stopped by [`Cluster::shutdown`].
    pub async fn wait_for_clients(&mut self) -> Vec<SessionReport<i64>> {
        let mut reports = Vec::with_capacity(self.clients.len());
        while !self.clients.is_empty() {
            let id = self.clients[0].0;
            let result = (&mut self.clients[0].1).await;
            self.clients.remove(0);
            match result {
                Ok(report) => {
                    tracing::info!(client = %id, outcome = %report.outcome, "client finished");
                    reports.push(report);
                }
                Err(e) => tracing::error!(client = %id, error = %e, "client task failed"),
            }
        }
        tracing::info!("all clients terminated");
        reports
    }

    /// Ask a server for its state, `None` if it is not running
    pub async fn server_state(&self, id: NodeId) -> Option<NodeStateReport> {
        let (tx, rx) = oneshot::channel();
        self.network.send(id, Diagnostic::GetState(tx).into());
        rx.await.ok()
    }

    pub async fn behavior(&self, id: NodeId) -> Option<Behavior> {
        let (tx, rx) = oneshot::channel();
        self.network.send(id, Diagnostic::GetBehavior(tx).into());
        rx.await.ok()
    }

    pub async fn committed_state(&self, id: NodeId) -> Option<i64> {
        let (tx, rx) = oneshot::channel();
        self.network.send(id, Diagnostic::GetStateMachineState(tx).into());
        rx.await.ok()
    }

    /// First server that currently believes it is leader
    pub async fn leader(&self) -> Option<NodeId> {
        for id in self.server_ids() {
            if self.behavior(id).await == Some(Behavior::Leader) {
                return Some(id);
            }
        }
        None
    }

    /// Stop every server and client and wait for their tasks.
    ///
    /// Returns the first server failure, if any.
    pub async fn shutdown(mut self) -> Result<Vec<SessionReport<i64>>> {
        tracing::info!("terminating hosts");
        for (id, _) in &self.servers {
            self.network.send(*id, ControlMessage::ShutDown.into());
        }
        for (id, _) in &self.clients {
            self.network.reply(*id, ClientMessage::ShutDown);
        }
        let reports = self.wait_for_clients().await;

        let mut first_error = None;
        for (id, handle) in self.servers.drain(..) {
            let result = handle
                .await
                .map_err(|e| TicketRaftError::Internal(format!("{id} task panicked: {e}")))
                .and_then(|r| r);
            if let Err(e) = result {
                tracing::error!(node = %id, error = %e, "server stopped with error");
                first_error.get_or_insert(e);
            }
            self.network.deregister_node(id);
        }
        for report in &reports {
            self.network.deregister_client(report.client);
        }

        tracing::info!("shutdown complete");
        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }
}
