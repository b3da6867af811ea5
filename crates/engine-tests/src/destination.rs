//! In-memory destination directory plugin.

use async_trait::async_trait;
use engine_core::{error::ItemError, mapping::ExternalIdIndex};
use model::{
    core::identifiers::{DestinationId, SourceId},
    execution::mapping::Namespace,
};
use std::{
    collections::BTreeMap,
    error::Error,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub taxonomy: String,
    pub name: String,
    pub parent: Option<DestinationId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub label: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub name: String,
    pub price_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    pub author: String,
    pub rating: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Source id of the migrated row; the external-id field.
    pub external_id: SourceId,
    pub title: String,
    pub status: String,
    pub author: u64,
    pub terms: Vec<DestinationId>,
    pub fields: Vec<(DestinationId, String)>,
    pub reviews: Vec<Review>,
}

#[derive(Default)]
struct Records {
    terms: BTreeMap<DestinationId, Term>,
    fields: BTreeMap<DestinationId, FormField>,
    plans: BTreeMap<DestinationId, Plan>,
    listings: BTreeMap<DestinationId, Listing>,
}

/// Record counts, for before/after comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub terms: usize,
    pub fields: usize,
    pub plans: usize,
    pub listings: usize,
    pub reviews: usize,
}

#[derive(Default)]
pub struct MemoryDestination {
    next_id: AtomicU64,
    records: Mutex<Records>,
    writes: AtomicU64,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> DestinationId {
        DestinationId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn records(&self) -> std::sync::MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn touch(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of create/update calls seen so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn create_term(&self, term: Term) -> DestinationId {
        self.touch();
        let id = self.allocate();
        self.records().terms.insert(id, term);
        id
    }

    pub fn update_term(&self, id: DestinationId, term: Term) -> Result<(), ItemError> {
        self.touch();
        match self.records().terms.get_mut(&id) {
            Some(slot) => {
                *slot = term;
                Ok(())
            }
            None => Err(ItemError::Write {
                source_id: term.name,
                message: format!("term {id} no longer exists"),
            }),
        }
    }

    pub fn create_field(&self, field: FormField) -> DestinationId {
        self.touch();
        let id = self.allocate();
        self.records().fields.insert(id, field);
        id
    }

    pub fn update_field(&self, id: DestinationId, field: FormField) {
        self.touch();
        self.records().fields.insert(id, field);
    }

    pub fn create_plan(&self, plan: Plan) -> DestinationId {
        self.touch();
        let id = self.allocate();
        self.records().plans.insert(id, plan);
        id
    }

    pub fn update_plan(&self, id: DestinationId, plan: Plan) {
        self.touch();
        self.records().plans.insert(id, plan);
    }

    pub fn create_listing(&self, listing: Listing) -> Result<DestinationId, ItemError> {
        self.touch();
        validate_listing(&listing)?;
        let id = self.allocate();
        self.records().listings.insert(id, listing);
        Ok(id)
    }

    pub fn update_listing(&self, id: DestinationId, listing: Listing) -> Result<(), ItemError> {
        self.touch();
        validate_listing(&listing)?;
        self.records().listings.insert(id, listing);
        Ok(())
    }

    pub fn listing(&self, id: DestinationId) -> Option<Listing> {
        self.records().listings.get(&id).cloned()
    }

    pub fn term(&self, id: DestinationId) -> Option<Term> {
        self.records().terms.get(&id).cloned()
    }

    pub fn counts(&self) -> Counts {
        let records = self.records();
        Counts {
            terms: records.terms.len(),
            fields: records.fields.len(),
            plans: records.plans.len(),
            listings: records.listings.len(),
            reviews: records.listings.values().map(|l| l.reviews.len()).sum(),
        }
    }
}

fn validate_listing(listing: &Listing) -> Result<(), ItemError> {
    if listing.title.trim().is_empty() {
        return Err(ItemError::Invalid {
            source_id: listing.external_id.to_string(),
            reason: "listing title is empty".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl ExternalIdIndex for MemoryDestination {
    async fn find_by_external_id(
        &self,
        _namespace: &Namespace,
        source_id: &SourceId,
    ) -> Result<Option<DestinationId>, Box<dyn Error + Send + Sync>> {
        Ok(self
            .records()
            .listings
            .iter()
            .find(|(_, listing)| &listing.external_id == source_id)
            .map(|(id, _)| *id))
    }
}
