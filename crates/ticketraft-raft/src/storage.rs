//! Durable per-node storage
//!
//! A server persists its term, vote, log and peer set through a
//! [`DurableStore`] and reloads them when it is rebuilt after a crash. Saves
//! are synchronous: a getter called right after a save sees the saved value.

use crate::log::LogEntry;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use ticketraft_core::{NodeId, Result, Term, TicketRaftError};

/// Persistent state of one server
pub trait DurableStore: Send + 'static {
    /// Bind the store to a server. Every other call fails until this is done.
    fn set_node_id(&mut self, id: NodeId);

    fn save_log(&mut self, log: &[LogEntry]) -> Result<()>;
    fn save_current_term(&mut self, term: Term) -> Result<()>;
    fn save_voted_for(&mut self, voted_for: Option<NodeId>) -> Result<()>;
    fn save_peers(&mut self, peers: &[NodeId]) -> Result<()>;

    fn log(&self) -> Result<Vec<LogEntry>>;
    fn current_term(&self) -> Result<Term>;
    fn voted_for(&self) -> Result<Option<NodeId>>;
    fn peers(&self) -> Result<Vec<NodeId>>;
}

/// In-process store, lost when dropped
#[derive(Debug, Default)]
pub struct MemoryStore {
    node: Option<NodeId>,
    current_term: Term,
    voted_for: Option<NodeId>,
    log: Vec<LogEntry>,
    peers: Vec<NodeId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> Result<()> {
        self.node.map(|_| ()).ok_or(TicketRaftError::NodeIdUnset)
    }
}

impl DurableStore for MemoryStore {
    fn set_node_id(&mut self, id: NodeId) {
        self.node = Some(id);
    }

    fn save_log(&mut self, log: &[LogEntry]) -> Result<()> {
        self.check()?;
        self.log = log.to_vec();
        Ok(())
    }

    fn save_current_term(&mut self, term: Term) -> Result<()> {
        self.check()?;
        self.current_term = term;
        Ok(())
    }

    fn save_voted_for(&mut self, voted_for: Option<NodeId>) -> Result<()> {
        self.check()?;
        self.voted_for = voted_for;
        Ok(())
    }

    fn save_peers(&mut self, peers: &[NodeId]) -> Result<()> {
        self.check()?;
        self.peers = peers.to_vec();
        Ok(())
    }

    fn log(&self) -> Result<Vec<LogEntry>> {
        self.check()?;
        Ok(self.log.clone())
    }

    fn current_term(&self) -> Result<Term> {
        self.check()?;
        Ok(self.current_term)
    }

    fn voted_for(&self) -> Result<Option<NodeId>> {
        self.check()?;
        Ok(self.voted_for)
    }

    fn peers(&self) -> Result<Vec<NodeId>> {
        self.check()?;
        Ok(self.peers.clone())
    }
}

/// Column family names
const CF_LOGS: &str = "logs";
const CF_META: &str = "meta";

/// Metadata keys, prefixed with the node id
const KEY_TERM: &str = "term";
const KEY_VOTE: &str = "vote";
const KEY_PEERS: &str = "peers";
const KEY_LOG_LEN: &str = "log_len";

/// RocksDB-backed store.
///
/// One database can hold several servers: metadata keys are prefixed with the
/// node id and log keys are `node id ++ index`, both big-endian so each node's
/// entries sort contiguously.
pub struct RocksDbStore {
    db: Arc<DB>,
    node: Option<NodeId>,
}

impl RocksDbStore {
    /// Open (or create) the database under `data_dir`
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let path = data_dir.as_ref().join("raft-state");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_opts = Options::default();
        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_LOGS, cf_opts.clone()),
            ColumnFamilyDescriptor::new(CF_META, cf_opts),
        ];

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)
            .map_err(|e| TicketRaftError::Storage(e.to_string()))?;

        tracing::debug!(path = %path.display(), "opened rocksdb store");

        Ok(Self {
            db: Arc::new(db),
            node: None,
        })
    }

    /// Another unbound handle on the same database
    pub fn handle(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            node: None,
        }
    }

    fn node(&self) -> Result<NodeId> {
        self.node.ok_or(TicketRaftError::NodeIdUnset)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| TicketRaftError::Storage(format!("column family {name} not found")))
    }

    fn meta_key(node: NodeId, key: &str) -> Vec<u8> {
        let mut out = node.0.to_be_bytes().to_vec();
        out.extend_from_slice(key.as_bytes());
        out
    }

    fn log_key(node: NodeId, index: u64) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&node.0.to_be_bytes());
        out[8..].copy_from_slice(&index.to_be_bytes());
        out
    }

    fn put_meta<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let node = self.node()?;
        let data = serde_json::to_vec(value)?;
        self.db
            .put_cf(self.cf(CF_META)?, Self::meta_key(node, key), data)
            .map_err(|e| TicketRaftError::Storage(e.to_string()))
    }

    fn get_meta<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let node = self.node()?;
        let data = self
            .db
            .get_cf(self.cf(CF_META)?, Self::meta_key(node, key))
            .map_err(|e| TicketRaftError::Storage(e.to_string()))?;
        match data {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl DurableStore for RocksDbStore {
    fn set_node_id(&mut self, id: NodeId) {
        self.node = Some(id);
    }

    fn save_log(&mut self, log: &[LogEntry]) -> Result<()> {
        let node = self.node()?;
        let old_len: u64 = self.get_meta(KEY_LOG_LEN)?.unwrap_or(0);
        let new_len = log.len() as u64;

        let cf_logs = self.cf(CF_LOGS)?;
        let mut batch = WriteBatch::default();
        for (index, entry) in log.iter().enumerate() {
            batch.put_cf(cf_logs, Self::log_key(node, index as u64), serde_json::to_vec(entry)?);
        }
        for index in new_len..old_len {
            batch.delete_cf(cf_logs, Self::log_key(node, index));
        }
        batch.put_cf(
            self.cf(CF_META)?,
            Self::meta_key(node, KEY_LOG_LEN),
            serde_json::to_vec(&new_len)?,
        );

        self.db
            .write(batch)
            .map_err(|e| TicketRaftError::Storage(e.to_string()))
    }

    fn save_current_term(&mut self, term: Term) -> Result<()> {
        self.put_meta(KEY_TERM, &term)
    }

    fn save_voted_for(&mut self, voted_for: Option<NodeId>) -> Result<()> {
        self.put_meta(KEY_VOTE, &voted_for)
    }

    fn save_peers(&mut self, peers: &[NodeId]) -> Result<()> {
        self.put_meta(KEY_PEERS, &peers)
    }

    fn log(&self) -> Result<Vec<LogEntry>> {
        let node = self.node()?;
        let len: u64 = self.get_meta(KEY_LOG_LEN)?.unwrap_or(0);
        let cf_logs = self.cf(CF_LOGS)?;

        let mut log = Vec::with_capacity(len as usize);
        for index in 0..len {
            let data = self
                .db
                .get_cf(cf_logs, Self::log_key(node, index))
                .map_err(|e| TicketRaftError::Storage(e.to_string()))?
                .ok_or_else(|| {
                    TicketRaftError::Storage(format!("missing log entry {index} for {node}"))
                })?;
            log.push(serde_json::from_slice(&data)?);
        }
        Ok(log)
    }

    fn current_term(&self) -> Result<Term> {
        Ok(self.get_meta(KEY_TERM)?.unwrap_or(0))
    }

    fn voted_for(&self) -> Result<Option<NodeId>> {
        Ok(self.get_meta::<Option<NodeId>>(KEY_VOTE)?.flatten())
    }

    fn peers(&self) -> Result<Vec<NodeId>> {
        Ok(self.get_meta(KEY_PEERS)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticketraft_core::ClientId;
    use ticketraft_statemachine::Command;

    fn entries(n: u64) -> Vec<LogEntry> {
        (0..n)
            .map(|i| LogEntry::new(1, Command::decrement(ClientId::new(1), i, 1)))
            .collect()
    }

    #[test]
    fn test_memory_store_requires_node_id() {
        let mut store = MemoryStore::new();
        assert!(matches!(store.current_term(), Err(TicketRaftError::NodeIdUnset)));
        assert!(store.save_current_term(2).is_err());

        store.set_node_id(NodeId::new(1));
        store.save_current_term(2).unwrap();
        assert_eq!(store.current_term().unwrap(), 2);
    }

    #[test]
    fn test_memory_store_fresh_defaults() {
        let mut store = MemoryStore::new();
        store.set_node_id(NodeId::new(0));
        assert_eq!(store.current_term().unwrap(), 0);
        assert_eq!(store.voted_for().unwrap(), None);
        assert!(store.log().unwrap().is_empty());
        assert!(store.peers().unwrap().is_empty());
    }

    #[test]
    fn test_rocksdb_store_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();

        let mut a = store.handle();
        a.set_node_id(NodeId::new(1));
        a.save_current_term(3).unwrap();
        a.save_voted_for(Some(NodeId::new(2))).unwrap();
        a.save_log(&entries(3)).unwrap();
        a.save_peers(&[NodeId::new(2), NodeId::new(3)]).unwrap();

        let mut b = store.handle();
        assert!(b.log().is_err());
        b.set_node_id(NodeId::new(1));
        assert_eq!(b.current_term().unwrap(), 3);
        assert_eq!(b.voted_for().unwrap(), Some(NodeId::new(2)));
        assert_eq!(b.log().unwrap().len(), 3);
        assert_eq!(b.peers().unwrap(), vec![NodeId::new(2), NodeId::new(3)]);
    }

    #[test]
    fn test_rocksdb_store_namespaces_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();

        let mut a = store.handle();
        a.set_node_id(NodeId::new(1));
        a.save_current_term(5).unwrap();
        a.save_log(&entries(2)).unwrap();

        let mut b = store.handle();
        b.set_node_id(NodeId::new(2));
        assert_eq!(b.current_term().unwrap(), 0);
        assert!(b.log().unwrap().is_empty());
        assert_eq!(b.voted_for().unwrap(), None);
    }

    #[test]
    fn test_rocksdb_store_truncates_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RocksDbStore::open(dir.path()).unwrap();
        store.set_node_id(NodeId::new(1));

        store.save_log(&entries(4)).unwrap();
        store.save_log(&entries(1)).unwrap();
        assert_eq!(store.log().unwrap().len(), 1);

        store.save_voted_for(None).unwrap();
        assert_eq!(store.voted_for().unwrap(), None);
    }
}
