use crate::{
    error::StateStoreError,
    state::{Entry, StateStore, WriteOp},
};
use model::core::identifiers::AdapterId;
use serde::{Serialize, de::DeserializeOwned};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

/// Typed, adapter-scoped view over a [`StateStore`].
///
/// Reads go through a per-handle cache that is populated on first read and
/// kept in step with this handle's own writes. Writes made by other handles
/// (a concurrent worker, a CLI abort) are only visible through the
/// `*_uncached` readers.
#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn StateStore>,
    scope: AdapterId,
    cache: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn StateStore>, scope: AdapterId) -> Self {
        Self {
            store,
            scope,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn scope(&self) -> &AdapterId {
        &self.scope
    }

    fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StateStoreError> {
        serde_json::from_slice(bytes).map_err(|source| StateStoreError::Codec {
            key: key.to_string(),
            source,
        })
    }

    fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Vec<u8>, StateStoreError> {
        serde_json::to_vec(value).map_err(|source| StateStoreError::Codec {
            key: key.to_string(),
            source,
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, StateStoreError> {
        Ok(self.get_opt(key).await?.unwrap_or(default))
    }

    pub async fn get_opt<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StateStoreError> {
        if let Some(bytes) = self.cache.read().await.get(key) {
            return Self::decode(key, bytes).map(Some);
        }

        match self.store.get(self.scope.as_str(), key).await? {
            Some(bytes) => {
                let value = Self::decode(key, &bytes)?;
                self.cache.write().await.insert(key.to_string(), bytes);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn get_uncached<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, StateStoreError> {
        Ok(self.get_uncached_opt(key).await?.unwrap_or(default))
    }

    pub async fn get_uncached_opt<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StateStoreError> {
        match self.store.get(self.scope.as_str(), key).await? {
            Some(bytes) => {
                let value = Self::decode(key, &bytes)?;
                self.cache.write().await.insert(key.to_string(), bytes);
                Ok(Some(value))
            }
            None => {
                self.cache.write().await.remove(key);
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StateStoreError> {
        let bytes = Self::encode(key, value)?;
        self.store.set(self.scope.as_str(), key, &bytes).await?;
        self.cache.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    /// Writes pre-encoded values atomically.
    pub async fn set_many<T: Serialize>(
        &self,
        entries: &[(String, T)],
    ) -> Result<(), StateStoreError> {
        let encoded = entries
            .iter()
            .map(|(key, value)| Ok((key.clone(), Self::encode(key, value)?)))
            .collect::<Result<Vec<Entry>, StateStoreError>>()?;

        self.store.set_many(self.scope.as_str(), &encoded).await?;

        let mut cache = self.cache.write().await;
        for (key, bytes) in encoded {
            cache.insert(key, bytes);
        }
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<(), StateStoreError> {
        self.store.remove(self.scope.as_str(), key).await?;
        self.cache.write().await.remove(key);
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StateStoreError> {
        Ok(self.store.get(self.scope.as_str(), key).await?.is_some())
    }

    pub async fn scan<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, T)>, StateStoreError> {
        self.store
            .scan_prefix(self.scope.as_str(), prefix)
            .await?
            .into_iter()
            .map(|(key, bytes)| {
                let value = Self::decode(&key, &bytes)?;
                Ok((key, value))
            })
            .collect()
    }

    pub async fn scan_after<T: DeserializeOwned>(
        &self,
        prefix: &str,
        after: &str,
        limit: usize,
    ) -> Result<Vec<(String, T)>, StateStoreError> {
        self.store
            .scan_after(self.scope.as_str(), prefix, after, limit)
            .await?
            .into_iter()
            .map(|(key, bytes)| {
                let value = Self::decode(&key, &bytes)?;
                Ok((key, value))
            })
            .collect()
    }

    pub async fn first<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> Result<Option<(String, T)>, StateStoreError> {
        match self.store.first_with_prefix(self.scope.as_str(), prefix).await? {
            Some((key, bytes)) => {
                let value = Self::decode(&key, &bytes)?;
                Ok(Some((key, value)))
            }
            None => Ok(None),
        }
    }

    pub async fn count(&self, prefix: &str) -> Result<usize, StateStoreError> {
        Ok(self.store.scan_prefix(self.scope.as_str(), prefix).await?.len())
    }

    pub async fn remove_prefix(&self, prefix: &str) -> Result<usize, StateStoreError> {
        let removed = self.store.remove_prefix(self.scope.as_str(), prefix).await?;
        self.cache.write().await.retain(|key, _| !key.starts_with(prefix));
        Ok(removed)
    }

    /// Atomic add; the result is never served from cache.
    pub async fn increment(&self, key: &str, by: u64) -> Result<u64, StateStoreError> {
        let value = self.store.increment(self.scope.as_str(), key, by).await?;
        self.cache.write().await.remove(key);
        Ok(value)
    }

    pub async fn clear(&self) -> Result<(), StateStoreError> {
        self.store.clear(self.scope.as_str()).await?;
        self.cache.write().await.clear();
        Ok(())
    }

    /// Applies the staged writes in one atomic step.
    pub async fn commit(&self, commit: Commit) -> Result<(), StateStoreError> {
        if commit.ops.is_empty() {
            return Ok(());
        }
        self.store.commit(self.scope.as_str(), &commit.ops).await?;

        let mut cache = self.cache.write().await;
        for op in commit.ops {
            match op {
                WriteOp::Set(key, bytes) => {
                    cache.insert(key, bytes);
                }
                WriteOp::Remove(key) | WriteOp::Increment(key, _) => {
                    cache.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// Writes staged for [`CheckpointStore::commit`]. Either all of them land
/// or none do.
#[derive(Debug, Default)]
pub struct Commit {
    ops: Vec<WriteOp>,
}

impl Commit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
    ) -> Result<&mut Self, StateStoreError> {
        let bytes = CheckpointStore::encode(key, value)?;
        self.ops.push(WriteOp::Set(key.to_string(), bytes));
        Ok(self)
    }

    pub fn remove(&mut self, key: &str) -> &mut Self {
        self.ops.push(WriteOp::Remove(key.to_string()));
        self
    }

    pub fn increment(&mut self, key: &str, by: u64) -> &mut Self {
        if by > 0 {
            self.ops.push(WriteOp::Increment(key.to_string(), by));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::sled_store::SledStateStore;
    use tempfile::tempdir;

    fn open(dir: &std::path::Path) -> Arc<dyn StateStore> {
        Arc::new(SledStateStore::open(dir).expect("open sled"))
    }

    #[tokio::test]
    async fn cached_reads_can_be_stale_but_uncached_reads_are_not() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());
        let worker = CheckpointStore::new(backend.clone(), AdapterId::new("dir"));
        let operator = CheckpointStore::new(backend, AdapterId::new("dir"));

        worker.set("queue:cancel", &false).await.unwrap();
        assert!(!worker.get("queue:cancel", false).await.unwrap());

        operator.set("queue:cancel", &true).await.unwrap();

        assert!(!worker.get("queue:cancel", false).await.unwrap());
        assert!(worker.get_uncached("queue:cancel", false).await.unwrap());
        assert!(worker.get("queue:cancel", false).await.unwrap());
    }

    #[tokio::test]
    async fn counters_read_back_as_numbers() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(open(dir.path()), AdapterId::new("dir"));

        store.increment("progress:succeeded", 5).await.unwrap();
        store.increment("progress:succeeded", 2).await.unwrap();

        let value: u64 = store.get("progress:succeeded", 0).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn scopes_do_not_leak() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());
        let a = CheckpointStore::new(backend.clone(), AdapterId::new("a"));
        let b = CheckpointStore::new(backend, AdapterId::new("b"));

        a.set("task", &"stage-1").await.unwrap();
        b.clear().await.unwrap();

        let task: Option<String> = a.get_uncached_opt("task").await.unwrap();
        assert_eq!(task.as_deref(), Some("stage-1"));
        assert_eq!(b.get_opt::<String>("task").await.unwrap(), None);
    }

    #[tokio::test]
    async fn commit_keeps_the_cache_in_step() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(open(dir.path()), AdapterId::new("dir"));
        store.set("finished", &false).await.unwrap();
        assert_eq!(store.get::<u64>("progress:failed", 0).await.unwrap(), 0);

        let mut commit = Commit::new();
        commit
            .set("task", &"stage-2")
            .unwrap()
            .remove("finished")
            .increment("progress:failed", 4)
            .increment("progress:skipped", 0);
        assert_eq!(commit.ops().len(), 3);
        store.commit(commit).await.unwrap();

        assert_eq!(store.get_opt::<String>("task").await.unwrap().as_deref(), Some("stage-2"));
        assert_eq!(store.get_opt::<bool>("finished").await.unwrap(), None);
        assert_eq!(store.get::<u64>("progress:failed", 0).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn remove_prefix_evicts_cached_entries() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(open(dir.path()), AdapterId::new("dir"));

        store
            .set_many(&[("log:1".to_string(), "a"), ("log:2".to_string(), "b")])
            .await
            .unwrap();
        assert_eq!(store.get_opt::<String>("log:1").await.unwrap().as_deref(), Some("a"));

        store.remove_prefix("log:").await.unwrap();
        assert_eq!(store.get_opt::<String>("log:1").await.unwrap(), None);
        assert_eq!(store.count("log:").await.unwrap(), 0);
    }
}
