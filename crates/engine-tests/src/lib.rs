use crate::{
    adapter::DirectoryAdapter,
    destination::MemoryDestination,
    fixture::DirectorySource,
};
use engine_config::config::EngineConfig;
use engine_core::state::sled_store::SledStateStore;
use engine_runtime::{controller::MigrationController, engine::Engine};
use std::sync::Arc;
use tempfile::TempDir;

pub mod adapter;
pub mod destination;
pub mod fixture;

/// A fresh engine over a temporary sled store plus the fixture source and
/// an empty destination.
pub struct TestEnv {
    pub engine: Engine,
    pub source: Arc<DirectorySource>,
    pub destination: Arc<MemoryDestination>,
    _dir: TempDir,
}

impl TestEnv {
    pub fn new(source: DirectorySource) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = SledStateStore::open(dir.path()).expect("open sled store");
        let engine = Engine::with_store(Arc::new(store), EngineConfig::with_state_dir(dir.path()));

        Self {
            engine,
            source: Arc::new(source),
            destination: Arc::new(MemoryDestination::new()),
            _dir: dir,
        }
    }

    pub fn adapter(&self) -> DirectoryAdapter {
        DirectoryAdapter::new(self.source.clone(), self.destination.clone())
    }

    pub fn register(&self, adapter: DirectoryAdapter) -> MigrationController<DirectoryAdapter> {
        self.engine.register(adapter).expect("register directory adapter")
    }

    pub fn controller(&self) -> MigrationController<DirectoryAdapter> {
        self.register(self.adapter())
    }
}
