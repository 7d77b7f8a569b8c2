//! Error types for TicketRaft

use crate::types::{ClientId, NodeId};
use thiserror::Error;

/// Main error type for TicketRaft
///
/// Protocol rejections (stale term, log mismatch, vote already cast) and
/// command rejections are ordinary responses, not errors. Only failures of the
/// surrounding machinery end up here.
#[derive(Error, Debug)]
pub enum TicketRaftError {
    // Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("durable store used before a node id was assigned")]
    NodeIdUnset,

    // Addressing errors
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("unknown client: {0}")]
    UnknownClient(ClientId),

    #[error("mailbox closed: {0}")]
    MailboxClosed(String),

    // Configuration errors
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TicketRaftError {
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Serialization(_) | Self::NodeIdUnset | Self::Io(_)
        )
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::UnknownNode(_) | Self::UnknownClient(_) | Self::MailboxClosed(_)
        )
    }
}

impl From<serde_json::Error> for TicketRaftError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for TicketRaft
pub type Result<T> = std::result::Result<T, TicketRaftError>;
