use crate::{
    adapter::SourceAdapter, controller::MigrationController, error::MigrationError,
    lock::AdapterLocks,
};
use engine_config::config::EngineConfig;
use engine_core::{
    error::StateStoreError,
    event_bus::bus::EventBus,
    state::{StateStore, checkpoint::CheckpointStore, sled_store::SledStateStore},
};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use tracing::info;

/// Owns the shared state backend, the per-adapter locks and the event bus,
/// and hands out one controller per registered adapter.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn StateStore>,
    config: EngineConfig,
    locks: Arc<AdapterLocks>,
    events: EventBus,
    registered: Arc<Mutex<HashSet<String>>>,
}

impl Engine {
    /// Opens (or creates) the sled database under `config.state_dir`.
    pub fn open(config: EngineConfig) -> Result<Self, MigrationError> {
        config.validate()?;
        let store = SledStateStore::open(&config.state_dir).map_err(StateStoreError::from)?;
        info!(state_dir = %config.state_dir.display(), "Opened state store");
        Ok(Self::with_store(Arc::new(store), config))
    }

    pub fn with_store(store: Arc<dyn StateStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            locks: Arc::new(AdapterLocks::new()),
            events: EventBus::new(),
            registered: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        self.store.clone()
    }

    /// Validates the adapter's stage plan and returns its controller. Each
    /// adapter id may be registered once per engine.
    pub fn register<A: SourceAdapter>(
        &self,
        adapter: A,
    ) -> Result<MigrationController<A>, MigrationError> {
        let id = adapter.id();
        let plan = adapter.plan()?;

        {
            let mut registered = self
                .registered
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !registered.insert(id.as_str().to_string()) {
                return Err(MigrationError::DuplicateAdapter(id.to_string()));
            }
        }

        info!(adapter = %id, stages = plan.len(), "Registered source adapter");
        let checkpoints = CheckpointStore::new(self.store.clone(), id);
        Ok(MigrationController::new(
            adapter,
            plan,
            checkpoints,
            self.events.clone(),
            self.locks.clone(),
            self.config.clone(),
        ))
    }

    pub async fn flush(&self) -> Result<(), MigrationError> {
        self.store.flush().await?;
        Ok(())
    }
}
