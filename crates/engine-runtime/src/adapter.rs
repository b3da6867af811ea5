use crate::{
    context::MigrationContext,
    error::{HandlerError, PlanError},
};
use async_trait::async_trait;
use engine_config::settings::ValidationErrors;
use engine_core::mapping::ExternalIdIndex;
use model::{
    core::identifiers::AdapterId,
    execution::{
        batch::{BatchJob, JobAction, JobItem, JobStatus},
        settings::{ImportSettings, UploadedFile},
        task::{MigrationTask, Stage, StageCounters},
    },
};
use std::{collections::HashSet, sync::Arc};

/// What a stage handler wants after one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStep {
    /// Not exhausted; call the same stage again with the updated offset.
    More,
    /// Exhausted; move to the successor stage.
    Next { reset_offset: bool },
}

impl StageStep {
    pub fn next() -> Self {
        Self::Next { reset_offset: true }
    }
}

/// One stage of an adapter. Called repeatedly until it returns
/// [`StageStep::Next`]; each call processes a bounded slice starting at
/// `task.offset` and records outcomes in `task.call`.
#[async_trait]
pub trait StageHandler<A: SourceAdapter>: Send + Sync {
    async fn advance(
        &self,
        ctx: &MigrationContext<A>,
        task: &mut MigrationTask<A::Stage>,
    ) -> Result<StageStep, HandlerError>;
}

/// A source plugin's schema adapter: declares its stages, validates its
/// settings, counts its items and runs the batch jobs its stages defer.
#[async_trait]
pub trait SourceAdapter: Send + Sync + Sized + 'static {
    type Stage: Stage;
    type Settings: Send + Sync + 'static;
    type Action: JobAction;
    type Item: JobItem;

    fn id(&self) -> AdapterId;

    fn plan(&self) -> Result<StagePlan<Self>, PlanError>;

    fn validate_settings(
        &self,
        raw: &ImportSettings,
        uploads: &[UploadedFile],
    ) -> Result<Self::Settings, ValidationErrors>;

    /// Number of source items the whole run will touch. Called once per run.
    async fn count_total_items(&self, ctx: &MigrationContext<Self>) -> Result<u64, HandlerError>;

    /// Processes one deferred batch, recording each item in `counters`.
    async fn run_job(
        &self,
        ctx: &MigrationContext<Self>,
        job: &BatchJob<Self::Action, Self::Item>,
        counters: &mut StageCounters,
    ) -> Result<JobStatus, HandlerError>;

    /// Destination lookup for namespaces mapped by external-id field.
    fn external_index(&self) -> Option<Arc<dyn ExternalIdIndex>> {
        None
    }
}

/// The adapter's ordered stages and their handlers.
pub struct StagePlan<A: SourceAdapter> {
    stages: Vec<(A::Stage, Arc<dyn StageHandler<A>>)>,
}

impl<A: SourceAdapter> StagePlan<A> {
    pub fn builder() -> StagePlanBuilder<A> {
        StagePlanBuilder { stages: Vec::new() }
    }

    pub fn first(&self) -> A::Stage {
        self.stages[0].0
    }

    pub fn stages(&self) -> impl Iterator<Item = A::Stage> + '_ {
        self.stages.iter().map(|(stage, _)| *stage)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn contains(&self, stage: A::Stage) -> bool {
        self.position(stage).is_some()
    }

    pub fn handler(&self, stage: A::Stage) -> Option<Arc<dyn StageHandler<A>>> {
        self.position(stage).map(|i| self.stages[i].1.clone())
    }

    /// The stage declared after `stage`, or `None` for the last one.
    pub fn successor(&self, stage: A::Stage) -> Option<A::Stage> {
        let i = self.position(stage)?;
        self.stages.get(i + 1).map(|(s, _)| *s)
    }

    fn position(&self, stage: A::Stage) -> Option<usize> {
        self.stages.iter().position(|(s, _)| *s == stage)
    }
}

pub struct StagePlanBuilder<A: SourceAdapter> {
    stages: Vec<(A::Stage, Arc<dyn StageHandler<A>>)>,
}

impl<A: SourceAdapter> StagePlanBuilder<A> {
    pub fn stage(mut self, stage: A::Stage, handler: impl StageHandler<A> + 'static) -> Self {
        self.stages.push((stage, Arc::new(handler)));
        self
    }

    pub fn build(self) -> Result<StagePlan<A>, PlanError> {
        if self.stages.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut seen = HashSet::new();
        for (stage, _) in &self.stages {
            if !seen.insert(*stage) {
                return Err(PlanError::DuplicateStage(stage.to_string()));
            }
        }

        Ok(StagePlan {
            stages: self.stages,
        })
    }
}
