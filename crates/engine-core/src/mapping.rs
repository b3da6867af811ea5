use crate::{
    error::{ItemError, MappingError, UpsertError},
    state::{checkpoint::CheckpointStore, keys},
};
use async_trait::async_trait;
use model::{
    core::identifiers::{DestinationId, SourceId},
    execution::{
        mapping::{IdMapping, MappingStyle, Namespace},
        task::Outcome,
    },
};
use std::{error::Error, future::Future, sync::Arc};
use tracing::{debug, warn};

/// Reverse lookup on the external-id field the destination writer stores on
/// each migrated record.
#[async_trait]
pub trait ExternalIdIndex: Send + Sync {
    async fn find_by_external_id(
        &self,
        namespace: &Namespace,
        source_id: &SourceId,
    ) -> Result<Option<DestinationId>, Box<dyn Error + Send + Sync>>;
}

/// Resolves source ids to destination ids so re-running a migration updates
/// records instead of duplicating them.
#[derive(Clone)]
pub struct IdResolver {
    store: CheckpointStore,
    index: Option<Arc<dyn ExternalIdIndex>>,
}

impl IdResolver {
    pub fn new(store: CheckpointStore) -> Self {
        Self { store, index: None }
    }

    pub fn with_index(mut self, index: Arc<dyn ExternalIdIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub async fn resolve(
        &self,
        namespace: &Namespace,
        source_id: &SourceId,
    ) -> Result<Option<DestinationId>, MappingError> {
        match namespace.style() {
            MappingStyle::SideTable => {
                let key = keys::id_map(namespace.entity().as_str(), source_id.as_str());
                Ok(self.store.get_opt::<DestinationId>(&key).await?)
            }
            MappingStyle::ExternalField => {
                let index = self.index.as_ref().ok_or_else(|| MappingError::MissingIndex {
                    namespace: namespace.to_string(),
                })?;
                index
                    .find_by_external_id(namespace, source_id)
                    .await
                    .map_err(|e| MappingError::Lookup {
                        namespace: namespace.to_string(),
                        source_id: source_id.to_string(),
                        message: e.to_string(),
                    })
            }
        }
    }

    /// Records `source_id -> destination_id`. Binding the id already stored is
    /// a no-op; binding a different one replaces it.
    pub async fn bind(
        &self,
        namespace: &Namespace,
        source_id: &SourceId,
        destination_id: DestinationId,
    ) -> Result<(), MappingError> {
        if namespace.style() == MappingStyle::ExternalField {
            return Ok(());
        }

        let key = keys::id_map(namespace.entity().as_str(), source_id.as_str());
        match self.store.get_opt::<DestinationId>(&key).await? {
            Some(existing) if existing == destination_id => return Ok(()),
            Some(existing) => {
                warn!(
                    namespace = %namespace,
                    source_id = %source_id,
                    previous = %existing,
                    replacement = %destination_id,
                    "Rebinding source id to a different destination record"
                );
            }
            None => {}
        }

        self.store.set(&key, &destination_id).await?;
        debug!(
            namespace = %namespace,
            source_id = %source_id,
            destination_id = %destination_id,
            "Bound id mapping"
        );
        Ok(())
    }

    /// Side-table mappings of one entity kind, ordered by source id key.
    pub async fn mappings(&self, namespace: &Namespace) -> Result<Vec<IdMapping>, MappingError> {
        let prefix = keys::id_map_prefix(namespace.entity().as_str());
        let entries = self.store.scan::<DestinationId>(&prefix).await?;

        Ok(entries
            .into_iter()
            .map(|(key, destination_id)| IdMapping {
                namespace: namespace.clone(),
                source_id: SourceId::new(key.trim_start_matches(prefix.as_str())),
                destination_id,
            })
            .collect())
    }

    /// Update in place when a mapping exists, otherwise create and bind.
    ///
    /// In dry-run mode neither callback runs and nothing is bound; the
    /// outcome that would have happened is returned.
    pub async fn upsert<C, CF, U, UF>(
        &self,
        namespace: &Namespace,
        source_id: &SourceId,
        dry_run: bool,
        create: C,
        update: U,
    ) -> Result<Outcome, UpsertError>
    where
        C: FnOnce() -> CF,
        CF: Future<Output = Result<DestinationId, ItemError>>,
        U: FnOnce(DestinationId) -> UF,
        UF: Future<Output = Result<(), ItemError>>,
    {
        let existing = self.resolve(namespace, source_id).await?;

        if dry_run {
            return Ok(match existing {
                Some(_) => Outcome::Updated,
                None => Outcome::Imported,
            });
        }

        match existing {
            Some(destination_id) => {
                update(destination_id).await?;
                Ok(Outcome::Updated)
            }
            None => {
                let destination_id = create().await?;
                self.bind(namespace, source_id, destination_id).await?;
                Ok(Outcome::Imported)
            }
        }
    }
}
