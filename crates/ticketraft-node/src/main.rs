//! TicketRaft Node - runs a ticket-selling cluster in one process

use clap::Parser;
use std::path::PathBuf;
use ticketraft_cluster::Cluster;
use ticketraft_core::ClusterConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ticketraft-node")]
#[command(about = "Replicated ticket counter demo")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of servers
    #[arg(long)]
    servers: Option<usize>,

    /// Number of clients
    #[arg(long)]
    clients: Option<usize>,

    /// Initial ticket count on every server
    #[arg(long)]
    tickets: Option<i64>,

    /// Request rounds per client
    #[arg(long)]
    rounds: Option<usize>,

    /// Inject a failure into the last client's queue every N rounds
    #[arg(long)]
    failure_every: Option<usize>,

    /// Persist server state in RocksDB under this directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ClusterConfig> {
        let mut config = match &self.config {
            Some(path) => ClusterConfig::load(path)?,
            None => ClusterConfig::default(),
        };
        if let Some(servers) = self.servers {
            config.servers = servers;
        }
        if let Some(clients) = self.clients {
            config.clients = clients;
        }
        if let Some(tickets) = self.tickets {
            config.initial_tickets = tickets;
        }
        if let Some(rounds) = self.rounds {
            config.rounds_per_client = rounds;
        }
        if self.failure_every.is_some() {
            config.failure_every = self.failure_every;
        }
        if self.data_dir.is_some() {
            config.data_dir = self.data_dir;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ticketraft=info".into()),
        )
        .init();

    let config = Args::parse().into_config()?;
    tracing::info!(
        servers = config.servers,
        clients = config.clients,
        tickets = config.initial_tickets,
        rounds = config.rounds_per_client,
        "starting ticketraft cluster"
    );

    let mut cluster = Cluster::spawn(config)?;

    let reports = tokio::select! {
        reports = cluster.wait_for_clients() => reports,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            Vec::new()
        }
    };

    for report in &reports {
        tracing::info!(
            client = %report.client,
            outcome = %report.outcome,
            sent = report.requests_sent,
            timeouts = report.timeouts,
            committed = report.updates_committed,
            last_read = ?report.last_read,
            "session summary"
        );
    }

    if let Some(leader) = cluster.leader().await {
        let remaining = cluster.committed_state(leader).await;
        tracing::info!(leader = %leader, remaining = ?remaining, "final committed state");
    }

    cluster.shutdown().await?;
    Ok(())
}
