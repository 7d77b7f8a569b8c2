//! Deadline waits shared by server and client tasks

use tokio::time::Instant;

/// Sleep until the deadline, or forever when no timer is armed
pub async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
