use model::core::identifiers::AdapterId;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Single-flight guard per adapter: at most one advance or queue tick of a
/// given adapter runs at a time. Different adapters never contend.
#[derive(Default)]
pub struct AdapterLocks {
    locks: Mutex<HashMap<AdapterId, Arc<AsyncMutex<()>>>>,
}

pub type AdapterGuard = OwnedMutexGuard<()>;

impl AdapterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: &AdapterId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(id.clone()).or_default().clone()
    }

    pub async fn acquire(&self, id: &AdapterId) -> AdapterGuard {
        self.lock_for(id).lock_owned().await
    }

    pub fn try_acquire(&self, id: &AdapterId) -> Option<AdapterGuard> {
        self.lock_for(id).try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_adapter_is_exclusive() {
        let locks = AdapterLocks::new();
        let id = AdapterId::new("dir");

        let guard = locks.acquire(&id).await;
        assert!(locks.try_acquire(&id).is_none());
        drop(guard);
        assert!(locks.try_acquire(&id).is_some());
    }

    #[tokio::test]
    async fn different_adapters_do_not_contend() {
        let locks = AdapterLocks::new();
        let _a = locks.acquire(&AdapterId::new("a")).await;
        assert!(locks.try_acquire(&AdapterId::new("b")).is_some());
    }
}
