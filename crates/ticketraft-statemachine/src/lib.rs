//! TicketRaft State Machine - Commands and the deterministic appliers they drive

pub mod command;
pub mod counter;
pub mod list;
pub mod machine;

pub use command::*;
pub use counter::*;
pub use list::*;
pub use machine::*;
