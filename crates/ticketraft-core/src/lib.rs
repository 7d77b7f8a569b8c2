//! TicketRaft Core - Identifiers, errors and configuration shared by every crate

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;
