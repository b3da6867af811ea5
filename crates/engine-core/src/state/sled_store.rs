use crate::{
    error::StateStoreError,
    state::{Entry, StateStore, WriteOp},
};
use async_trait::async_trait;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use std::{ops::Bound, path::Path};

const SCOPE_TREE_PREFIX: &str = "adapter:";

/// Sled-backed state. Each adapter scope is its own tree, so clearing one
/// adapter never touches another.
pub struct SledStateStore {
    db: sled::Db,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// In-memory store that vanishes on drop.
    pub fn temporary() -> Result<Self, sled::Error> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    #[inline]
    fn tree_name(scope: &str) -> String {
        format!("{SCOPE_TREE_PREFIX}{scope}")
    }

    fn tree(&self, scope: &str) -> Result<sled::Tree, StateStoreError> {
        Ok(self.db.open_tree(Self::tree_name(scope))?)
    }

    fn decode_entry(key: sled::IVec, value: sled::IVec) -> Entry {
        (String::from_utf8_lossy(&key).into_owned(), value.to_vec())
    }
}

fn parse_counter(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Vec<u8>>, StateStoreError> {
        Ok(self.tree(scope)?.get(key)?.map(|v| v.to_vec()))
    }

    async fn set(&self, scope: &str, key: &str, value: &[u8]) -> Result<(), StateStoreError> {
        self.tree(scope)?.insert(key, value)?;
        Ok(())
    }

    async fn set_many(&self, scope: &str, entries: &[Entry]) -> Result<(), StateStoreError> {
        let mut batch = sled::Batch::default();
        for (key, value) in entries {
            batch.insert(key.as_bytes(), value.as_slice());
        }
        self.tree(scope)?.apply_batch(batch)?;
        Ok(())
    }

    async fn remove(&self, scope: &str, key: &str) -> Result<(), StateStoreError> {
        self.tree(scope)?.remove(key)?;
        Ok(())
    }

    async fn scan_prefix(&self, scope: &str, prefix: &str) -> Result<Vec<Entry>, StateStoreError> {
        let mut entries = Vec::new();
        for item in self.tree(scope)?.scan_prefix(prefix) {
            let (key, value) = item?;
            entries.push(Self::decode_entry(key, value));
        }
        Ok(entries)
    }

    async fn scan_after(
        &self,
        scope: &str,
        prefix: &str,
        after: &str,
        limit: usize,
    ) -> Result<Vec<Entry>, StateStoreError> {
        let tree = self.tree(scope)?;
        let lower = if after < prefix {
            Bound::Included(prefix.as_bytes().to_vec())
        } else {
            Bound::Excluded(after.as_bytes().to_vec())
        };

        let mut entries = Vec::new();
        for item in tree.range((lower, Bound::Unbounded)) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) || entries.len() >= limit {
                break;
            }
            entries.push(Self::decode_entry(key, value));
        }
        Ok(entries)
    }

    async fn first_with_prefix(
        &self,
        scope: &str,
        prefix: &str,
    ) -> Result<Option<Entry>, StateStoreError> {
        match self.tree(scope)?.scan_prefix(prefix).next() {
            Some(item) => {
                let (key, value) = item?;
                Ok(Some(Self::decode_entry(key, value)))
            }
            None => Ok(None),
        }
    }

    async fn remove_prefix(&self, scope: &str, prefix: &str) -> Result<usize, StateStoreError> {
        let tree = self.tree(scope)?;
        let mut batch = sled::Batch::default();
        let mut removed = 0;
        for item in tree.scan_prefix(prefix).keys() {
            batch.remove(item?);
            removed += 1;
        }
        tree.apply_batch(batch)?;
        Ok(removed)
    }

    async fn increment(&self, scope: &str, key: &str, by: u64) -> Result<u64, StateStoreError> {
        let mut corrupt = false;
        let updated = self.tree(scope)?.update_and_fetch(key, |old| match old {
            None => Some(by.to_string().into_bytes()),
            Some(bytes) => match parse_counter(bytes) {
                Some(current) => Some(current.saturating_add(by).to_string().into_bytes()),
                None => {
                    corrupt = true;
                    Some(bytes.to_vec())
                }
            },
        })?;

        if corrupt {
            return Err(StateStoreError::CorruptCounter {
                key: key.to_string(),
            });
        }

        updated
            .as_deref()
            .and_then(parse_counter)
            .ok_or_else(|| StateStoreError::CorruptCounter {
                key: key.to_string(),
            })
    }

    async fn commit(&self, scope: &str, ops: &[WriteOp]) -> Result<(), StateStoreError> {
        if ops.is_empty() {
            return Ok(());
        }

        let result = self.tree(scope)?.transaction(
            |tx| -> ConflictableTransactionResult<(), StateStoreError> {
                for op in ops {
                    match op {
                        WriteOp::Set(key, value) => {
                            tx.insert(key.as_bytes(), value.as_slice())?;
                        }
                        WriteOp::Remove(key) => {
                            tx.remove(key.as_bytes())?;
                        }
                        WriteOp::Increment(key, by) => {
                            let current = match tx.get(key.as_bytes())? {
                                None => 0,
                                Some(bytes) => parse_counter(&bytes).ok_or_else(|| {
                                    ConflictableTransactionError::Abort(
                                        StateStoreError::CorruptCounter { key: key.clone() },
                                    )
                                })?,
                            };
                            let next = current.saturating_add(*by).to_string();
                            tx.insert(key.as_bytes(), next.as_bytes())?;
                        }
                    }
                }
                Ok(())
            },
        );

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(err.into()),
        }
    }

    async fn clear(&self, scope: &str) -> Result<(), StateStoreError> {
        self.db.drop_tree(Self::tree_name(scope))?;
        Ok(())
    }

    async fn scopes(&self) -> Result<Vec<String>, StateStoreError> {
        let mut scopes = Vec::new();
        for name in self.db.tree_names() {
            let Some(scope) = name.strip_prefix(SCOPE_TREE_PREFIX.as_bytes()) else {
                continue;
            };
            if self.db.open_tree(&name)?.is_empty() {
                continue;
            }
            scopes.push(String::from_utf8_lossy(scope).into_owned());
        }
        scopes.sort();
        Ok(scopes)
    }

    async fn flush(&self) -> Result<(), StateStoreError> {
        self.db.flush_async().await?;
        Ok(())
    }
}
