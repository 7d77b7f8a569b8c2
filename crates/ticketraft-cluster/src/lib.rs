//! TicketRaft Cluster - bootstrap and teardown of an in-process cluster

pub mod cluster;
pub mod workload;

pub use cluster::*;
pub use workload::*;
