use crate::{
    adapter::{SourceAdapter, StagePlan, StageStep},
    context::MigrationContext,
    error::{HandlerError, MigrationError},
};
use chrono::Utc;
use model::{
    events::StageAdvanced,
    execution::task::{MigrationTask, StageCounters},
};
use tracing::{debug, info, warn};

/// Result of one sequencer step.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance<S> {
    Continue(MigrationTask<S>),
    /// Every declared stage is exhausted.
    Terminal,
}

/// One dispatched call: where the task goes next and the counters the call
/// produced. The caller persists both in one commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Stepped<S> {
    pub next: Advance<S>,
    pub counters: StageCounters,
}

/// Moves `task` to the stage after its current one, or reports terminal.
pub fn next_stage<A: SourceAdapter>(
    plan: &StagePlan<A>,
    mut task: MigrationTask<A::Stage>,
    reset_offset: bool,
) -> Advance<A::Stage> {
    match plan.successor(task.stage) {
        Some(next) => {
            task.enter_stage(next, reset_offset);
            Advance::Continue(task)
        }
        None => Advance::Terminal,
    }
}

/// Runs the current stage handler once and returns the task to persist
/// along with the call's counters.
///
/// Writes no checkpoint or counter itself, so calling it again with the
/// same task after any error repeats the call without double counting.
pub async fn advance<A: SourceAdapter>(
    ctx: &MigrationContext<A>,
    plan: &StagePlan<A>,
    mut task: MigrationTask<A::Stage>,
) -> Result<Stepped<A::Stage>, MigrationError> {
    let stage = task.stage;
    let handler = plan
        .handler(stage)
        .ok_or_else(|| MigrationError::UnknownStage(stage.to_string()))?;

    task.call.reset();

    if task.extra.total_items.is_none() {
        task.extra.total_items = Some(count_items(ctx, stage).await?);
    }

    let offset_before = task.offset;
    debug!(adapter = %task.adapter_id, stage = %stage, offset = offset_before, "Dispatching stage");

    let step = match handler.advance(ctx, &mut task).await {
        Ok(step) => step,
        Err(HandlerError::Stage { message }) => {
            let counters = task.call;
            ctx.progress()
                .error(format!("Stage {stage} failed and was skipped: {message}"))
                .await?;
            let next = transition(ctx, plan, task, true).await?;
            return Ok(Stepped { next, counters });
        }
        Err(HandlerError::System(source)) => {
            return Err(MigrationError::Handler {
                stage: stage.to_string(),
                source,
            });
        }
    };

    if task.stage != stage {
        return Err(MigrationError::UnknownStage(task.stage.to_string()));
    }
    if task.offset < offset_before {
        return Err(MigrationError::OffsetRegression {
            stage: stage.to_string(),
            from: offset_before,
            to: task.offset,
        });
    }

    let counters = task.call;
    let next = match step {
        StageStep::More => Advance::Continue(task),
        StageStep::Next { reset_offset } => transition(ctx, plan, task, reset_offset).await?,
    };
    Ok(Stepped { next, counters })
}

/// Counts the run's items once. A source that cannot be counted leaves the
/// run without an expected total instead of stopping it; a system error is
/// retried on the next call.
async fn count_items<A: SourceAdapter>(
    ctx: &MigrationContext<A>,
    stage: A::Stage,
) -> Result<u64, MigrationError> {
    match ctx.adapter().count_total_items(ctx).await {
        Ok(counted) => {
            let total = ctx.progress().set_total_once(counted).await?;
            ctx.progress()
                .info(format!("Found {total} item(s) to migrate"))
                .await?;
            Ok(total)
        }
        Err(HandlerError::Stage { message }) => {
            warn!(
                adapter = %ctx.store().scope(),
                stage = %stage,
                "Item count unavailable: {message}"
            );
            ctx.progress()
                .error(format!("Could not count items to migrate: {message}"))
                .await?;
            Ok(0)
        }
        Err(HandlerError::System(source)) => Err(MigrationError::Handler {
            stage: stage.to_string(),
            source,
        }),
    }
}

async fn transition<A: SourceAdapter>(
    ctx: &MigrationContext<A>,
    plan: &StagePlan<A>,
    task: MigrationTask<A::Stage>,
    reset_offset: bool,
) -> Result<Advance<A::Stage>, MigrationError> {
    let from = task.stage;
    let adapter_id = task.adapter_id.clone();
    let next = next_stage(plan, task, reset_offset);

    let to = match &next {
        Advance::Continue(task) => {
            info!(adapter = %adapter_id, from = %from, to = %task.stage, "Stage complete");
            ctx.progress()
                .info(format!("Finished {from}; starting {}", task.stage))
                .await?;
            Some(task.stage.to_string())
        }
        Advance::Terminal => {
            info!(adapter = %adapter_id, last = %from, "All stages complete");
            ctx.progress().info(format!("Finished {from}; all stages done")).await?;
            None
        }
    };

    ctx.events()
        .publish(StageAdvanced {
            adapter_id,
            from: from.to_string(),
            to,
            timestamp: Utc::now(),
        })
        .await;

    Ok(next)
}
