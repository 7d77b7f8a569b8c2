//! TicketRaft Client - request queue driver with server failover

pub mod session;

pub use session::{ClientSession, SessionOutcome, SessionReport};
