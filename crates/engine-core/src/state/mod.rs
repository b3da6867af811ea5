use crate::error::StateStoreError;
use async_trait::async_trait;

pub mod checkpoint;
pub mod keys;
pub mod sled_store;

pub type Entry = (String, Vec<u8>);

/// One write inside [`StateStore::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set(String, Vec<u8>),
    Remove(String),
    /// Adds to a decimal counter, missing counts as zero.
    Increment(String, u64),
}

impl WriteOp {
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Set(key, _) | WriteOp::Remove(key) | WriteOp::Increment(key, _) => key,
        }
    }
}

/// Durable key/value storage partitioned into scopes, one scope per adapter.
///
/// Values are opaque bytes; [`checkpoint::CheckpointStore`] layers typed
/// access and a read cache on top.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Vec<u8>>, StateStoreError>;

    async fn set(&self, scope: &str, key: &str, value: &[u8]) -> Result<(), StateStoreError>;

    /// Writes all entries atomically.
    async fn set_many(&self, scope: &str, entries: &[Entry]) -> Result<(), StateStoreError>;

    async fn remove(&self, scope: &str, key: &str) -> Result<(), StateStoreError>;

    /// All entries whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, scope: &str, prefix: &str) -> Result<Vec<Entry>, StateStoreError>;

    /// Up to `limit` entries with `prefix` whose key sorts strictly after `after`.
    async fn scan_after(
        &self,
        scope: &str,
        prefix: &str,
        after: &str,
        limit: usize,
    ) -> Result<Vec<Entry>, StateStoreError>;

    async fn first_with_prefix(
        &self,
        scope: &str,
        prefix: &str,
    ) -> Result<Option<Entry>, StateStoreError>;

    async fn remove_prefix(&self, scope: &str, prefix: &str) -> Result<usize, StateStoreError>;

    /// Atomically adds `by` to the decimal counter at `key` (missing counts as
    /// zero) and returns the new value.
    async fn increment(&self, scope: &str, key: &str, by: u64) -> Result<u64, StateStoreError>;

    /// Applies every op or none of them.
    async fn commit(&self, scope: &str, ops: &[WriteOp]) -> Result<(), StateStoreError>;

    async fn clear(&self, scope: &str) -> Result<(), StateStoreError>;

    /// Names of every scope that holds state.
    async fn scopes(&self) -> Result<Vec<String>, StateStoreError>;

    async fn flush(&self) -> Result<(), StateStoreError>;
}
