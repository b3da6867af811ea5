//! Fixture adapter migrating [`DirectorySource`] into [`MemoryDestination`].

use crate::{
    destination::{FormField, Listing, MemoryDestination, Plan, Review, Term},
    fixture::{DirectorySource, SourceTerm, page},
};
use async_trait::async_trait;
use engine_config::settings::{SettingsValidator, ValidationErrors};
use engine_core::{error::ItemError, mapping::ExternalIdIndex};
use engine_runtime::{
    adapter::{SourceAdapter, StageHandler, StagePlan, StageStep},
    context::MigrationContext,
    error::{HandlerError, PlanError},
};
use model::{
    core::identifiers::{AdapterId, SourceId},
    execution::{
        batch::{BatchJob, JobStatus},
        settings::{ImportSettings, UploadedFile},
        task::{MigrationTask, StageCounters},
    },
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tokio::sync::Notify;

pub const ADAPTER_ID: &str = "business-directory";

/// Listing ids read from the source per call of the listings stage.
pub const LISTING_PAGE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryStage {
    Categories,
    Tags,
    CustomFields,
    Packages,
    Listings,
}

impl fmt::Display for DirectoryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DirectoryStage::Categories => "categories",
            DirectoryStage::Tags => "tags",
            DirectoryStage::CustomFields => "custom_fields",
            DirectoryStage::Packages => "packages",
            DirectoryStage::Listings => "listings",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryAction {
    ImportListings,
}

impl fmt::Display for DirectoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("import_listings")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySettings {
    pub author: u64,
    pub listing_status: String,
    pub import_reviews: bool,
}

/// Holds the first batch job inside `run_job` until released, so tests can
/// act while a job is in flight.
#[derive(Default)]
pub struct JobGate {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl JobGate {
    pub fn armed() -> Arc<Self> {
        let gate = Self::default();
        gate.armed.store(true, Ordering::SeqCst);
        Arc::new(gate)
    }

    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

pub struct DirectoryAdapter {
    source: Arc<DirectorySource>,
    destination: Arc<MemoryDestination>,
    gate: Option<Arc<JobGate>>,
    jobs_started: Arc<AtomicUsize>,
}

impl DirectoryAdapter {
    pub fn new(source: Arc<DirectorySource>, destination: Arc<MemoryDestination>) -> Self {
        Self {
            source,
            destination,
            gate: None,
            jobs_started: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_gate(mut self, gate: Arc<JobGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn jobs_started(&self) -> Arc<AtomicUsize> {
        self.jobs_started.clone()
    }

    async fn import_listing(
        &self,
        ctx: &MigrationContext<Self>,
        id: u64,
        counters: &mut StageCounters,
    ) -> Result<(), HandlerError> {
        let source_id = SourceId::from(id);
        let Some(row) = self.source.listing(id) else {
            let error = ItemError::Invalid {
                source_id: source_id.to_string(),
                reason: "listing vanished from the source".to_string(),
            };
            return ctx.item_failed(counters, &error).await;
        };

        let categories = ctx.side_table("category");
        let tags = ctx.side_table("tag");
        let fields = ctx.side_table("field");
        let mut terms = Vec::new();
        for term in &row.categories {
            if let Some(dest) = ctx.resolver().resolve(&categories, &SourceId::from(*term)).await? {
                terms.push(dest);
            }
        }
        for term in &row.tags {
            if let Some(dest) = ctx.resolver().resolve(&tags, &SourceId::from(*term)).await? {
                terms.push(dest);
            }
        }
        let mut values = Vec::new();
        for (field, value) in &row.fields {
            if let Some(dest) = ctx.resolver().resolve(&fields, &SourceId::from(*field)).await? {
                values.push((dest, value.clone()));
            }
        }

        let settings = ctx.settings();
        let reviews = if settings.import_reviews {
            row.reviews
                .iter()
                .map(|r| Review {
                    author: r.author.clone(),
                    rating: r.rating,
                })
                .collect()
        } else {
            Vec::new()
        };

        let record = Listing {
            external_id: source_id.clone(),
            title: row.title.clone(),
            status: settings.listing_status.clone(),
            author: settings.author,
            terms,
            fields: values,
            reviews,
        };

        let create_dest = self.destination.clone();
        let update_dest = self.destination.clone();
        let update_record = record.clone();
        ctx.upsert(
            &ctx.external_field("listing"),
            &source_id,
            counters,
            move || async move { create_dest.create_listing(record) },
            move |id| async move { update_dest.update_listing(id, update_record) },
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SourceAdapter for DirectoryAdapter {
    type Stage = DirectoryStage;
    type Settings = DirectorySettings;
    type Action = DirectoryAction;
    type Item = u64;

    fn id(&self) -> AdapterId {
        AdapterId::new(ADAPTER_ID)
    }

    fn plan(&self) -> Result<StagePlan<Self>, PlanError> {
        StagePlan::builder()
            .stage(DirectoryStage::Categories, TermStage { taxonomy: "category" })
            .stage(DirectoryStage::Tags, TermStage { taxonomy: "tag" })
            .stage(DirectoryStage::CustomFields, FieldStage)
            .stage(DirectoryStage::Packages, PackageStage)
            .stage(DirectoryStage::Listings, ListingStage)
            .build()
    }

    fn validate_settings(
        &self,
        raw: &ImportSettings,
        uploads: &[UploadedFile],
    ) -> Result<DirectorySettings, ValidationErrors> {
        let mut v = SettingsValidator::new(raw, uploads);
        let author = v.u64_in_range("author", 1, 1, u64::from(u32::MAX));
        let listing_status = v
            .one_of("listing_status", &["publish", "draft", "pending"], Some("publish"))
            .unwrap_or_else(|| "publish".to_string());
        let import_reviews = v.bool("import_reviews", true);

        v.finish(DirectorySettings {
            author,
            listing_status,
            import_reviews,
        })
    }

    async fn count_total_items(&self, _ctx: &MigrationContext<Self>) -> Result<u64, HandlerError> {
        Ok(self.source.total_items())
    }

    async fn run_job(
        &self,
        ctx: &MigrationContext<Self>,
        job: &BatchJob<DirectoryAction, u64>,
        counters: &mut StageCounters,
    ) -> Result<JobStatus, HandlerError> {
        self.jobs_started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }

        match job.action {
            DirectoryAction::ImportListings => {
                for id in &job.items {
                    self.import_listing(ctx, *id, counters).await?;
                }
            }
        }
        Ok(JobStatus::Done)
    }

    fn external_index(&self) -> Option<Arc<dyn ExternalIdIndex>> {
        Some(self.destination.clone())
    }
}

/// Categories and tags. Parents precede children in source order, so a
/// parent's mapping is already bound when a child is written.
struct TermStage {
    taxonomy: &'static str,
}

#[async_trait]
impl StageHandler<DirectoryAdapter> for TermStage {
    async fn advance(
        &self,
        ctx: &MigrationContext<DirectoryAdapter>,
        task: &mut MigrationTask<DirectoryStage>,
    ) -> Result<StageStep, HandlerError> {
        let source = &ctx.adapter().source;
        let rows: &[SourceTerm] = match self.taxonomy {
            "category" => &source.categories,
            _ => &source.tags,
        };
        let namespace = ctx.side_table(self.taxonomy);
        let batch = page(rows, task.offset, ctx.batch_size());

        for row in batch {
            let parent = match row.parent {
                Some(parent) => ctx.resolver().resolve(&namespace, &SourceId::from(parent)).await?,
                None => None,
            };
            let term = Term {
                taxonomy: self.taxonomy.to_string(),
                name: row.name.clone(),
                parent,
            };

            let create_dest = ctx.adapter().destination.clone();
            let update_dest = ctx.adapter().destination.clone();
            let update_term = term.clone();
            let outcome = ctx
                .upsert(
                    &namespace,
                    &SourceId::from(row.id),
                    &mut task.call,
                    move || async move { Ok(create_dest.create_term(term)) },
                    move |id| async move { update_dest.update_term(id, update_term) },
                )
                .await?;
            tracing::trace!(taxonomy = self.taxonomy, id = row.id, ?outcome, "Migrated term");
        }

        task.advance_offset(batch.len() as u64);
        Ok(exhausted(task.offset, rows.len()))
    }
}

struct FieldStage;

#[async_trait]
impl StageHandler<DirectoryAdapter> for FieldStage {
    async fn advance(
        &self,
        ctx: &MigrationContext<DirectoryAdapter>,
        task: &mut MigrationTask<DirectoryStage>,
    ) -> Result<StageStep, HandlerError> {
        let rows = &ctx.adapter().source.fields;
        let namespace = ctx.side_table("field");
        let batch = page(rows, task.offset, ctx.batch_size());

        for row in batch {
            let field = FormField {
                label: row.label.clone(),
                kind: row.kind.clone(),
            };
            let create_dest = ctx.adapter().destination.clone();
            let update_dest = ctx.adapter().destination.clone();
            let update_field = field.clone();
            ctx.upsert(
                &namespace,
                &SourceId::from(row.id),
                &mut task.call,
                move || async move { Ok(create_dest.create_field(field)) },
                move |id| async move {
                    update_dest.update_field(id, update_field);
                    Ok(())
                },
            )
            .await?;
        }

        task.advance_offset(batch.len() as u64);
        Ok(exhausted(task.offset, rows.len()))
    }
}

struct PackageStage;

#[async_trait]
impl StageHandler<DirectoryAdapter> for PackageStage {
    async fn advance(
        &self,
        ctx: &MigrationContext<DirectoryAdapter>,
        task: &mut MigrationTask<DirectoryStage>,
    ) -> Result<StageStep, HandlerError> {
        let Some(rows) = &ctx.adapter().source.packages else {
            return Err(HandlerError::stage("source table 'packages' does not exist"));
        };
        let namespace = ctx.side_table("package");
        let batch = page(rows, task.offset, ctx.batch_size());

        for row in batch {
            let plan = Plan {
                name: row.name.clone(),
                price_cents: row.price_cents,
            };
            let create_dest = ctx.adapter().destination.clone();
            let update_dest = ctx.adapter().destination.clone();
            let update_plan = plan.clone();
            ctx.upsert(
                &namespace,
                &SourceId::from(row.id),
                &mut task.call,
                move || async move { Ok(create_dest.create_plan(plan)) },
                move |id| async move {
                    update_dest.update_plan(id, update_plan);
                    Ok(())
                },
            )
            .await?;
        }

        task.advance_offset(batch.len() as u64);
        Ok(exhausted(task.offset, rows.len()))
    }
}

/// Defers listings to the batch queue one source page at a time.
struct ListingStage;

#[async_trait]
impl StageHandler<DirectoryAdapter> for ListingStage {
    async fn advance(
        &self,
        ctx: &MigrationContext<DirectoryAdapter>,
        task: &mut MigrationTask<DirectoryStage>,
    ) -> Result<StageStep, HandlerError> {
        let rows = &ctx.adapter().source.listings;
        let batch = page(rows, task.offset, LISTING_PAGE);

        let ids: Vec<u64> = batch.iter().map(|l| l.id).collect();
        ctx.defer(DirectoryAction::ImportListings, ids).await?;

        task.advance_offset(batch.len() as u64);
        Ok(exhausted(task.offset, rows.len()))
    }
}

fn exhausted(offset: u64, rows: usize) -> StageStep {
    if offset >= rows as u64 {
        StageStep::next()
    } else {
        StageStep::More
    }
}
