//! Replicated log entries and the helpers the roles share for reading them

use serde::{Deserialize, Serialize};
use ticketraft_core::{LogIndex, Term, NONE};
use ticketraft_statemachine::Command;

/// A command tagged with the term of the leader that accepted it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub command: Command,
}

impl LogEntry {
    pub fn new(term: Term, command: Command) -> Self {
        Self { term, command }
    }
}

/// Index of the last entry, `-1` for an empty log
pub fn last_index(log: &[LogEntry]) -> LogIndex {
    log.len() as LogIndex - 1
}

/// Term of the last entry, `-1` for an empty log
pub fn last_term(log: &[LogEntry]) -> Term {
    log.last().map_or(NONE, |entry| entry.term)
}

/// Term of the entry at `index`, `-1` if there is none
pub fn term_at(log: &[LogEntry], index: LogIndex) -> Term {
    entry_at(log, index).map_or(NONE, |entry| entry.term)
}

pub fn entry_at(log: &[LogEntry], index: LogIndex) -> Option<&LogEntry> {
    usize::try_from(index).ok().and_then(|i| log.get(i))
}

/// Entries from `from` (inclusive) to the end; empty when `from` is past the end
pub fn suffix(log: &[LogEntry], from: LogIndex) -> &[LogEntry] {
    let start = from.clamp(0, log.len() as LogIndex) as usize;
    &log[start..]
}

/// Splice `entries` in right after `prev_index`.
///
/// Existing entries that agree with the incoming ones are kept. At the first
/// index whose term differs, the local suffix is dropped and the remaining
/// incoming entries are appended. Entries already in the log beyond the
/// incoming batch are left alone when nothing conflicts.
pub fn splice(log: &mut Vec<LogEntry>, prev_index: LogIndex, entries: &[LogEntry]) {
    for (offset, entry) in entries.iter().enumerate() {
        let index = (prev_index + 1) as usize + offset;
        if index >= log.len() {
            log.extend_from_slice(&entries[offset..]);
            return;
        }
        if log[index].term != entry.term {
            log.truncate(index);
            log.extend_from_slice(&entries[offset..]);
            return;
        }
    }
}
