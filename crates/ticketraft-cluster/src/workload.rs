//! Client workloads and server orderings

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use ticketraft_core::{ClientId, NodeId};
use ticketraft_raft::QueuedRequest;
use ticketraft_statemachine::Command;

/// Build a client's request queue.
///
/// Each round is `updates_per_round` take-one-ticket updates followed by an
/// unstable read and a committed read. Command ids run consecutively across
/// rounds. With `failure_every = Some(k)`, a failure marker is placed after
/// the updates of every round whose number is a multiple of `k`, starting
/// with round 0.
pub fn request_queue(
    client: ClientId,
    rounds: usize,
    updates_per_round: usize,
    failure_every: Option<usize>,
) -> Vec<QueuedRequest> {
    let mut queue = Vec::with_capacity(rounds * (updates_per_round + 3));
    for round in 0..rounds {
        for i in 0..updates_per_round {
            let id = (round * updates_per_round + i) as u64;
            queue.push(QueuedRequest::Update(Command::decrement(client, id, 1)));
        }
        if failure_every.is_some_and(|k| k > 0 && round % k == 0) {
            queue.push(QueuedRequest::Failure);
        }
        queue.push(QueuedRequest::UnstableRead);
        queue.push(QueuedRequest::CommittedRead);
    }
    queue
}

/// Deterministic permutation of `servers` for a given seed
pub fn shuffled_servers(servers: &[NodeId], seed: u64) -> Vec<NodeId> {
    let mut shuffled = servers.to_vec();
    shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
    shuffled
}
