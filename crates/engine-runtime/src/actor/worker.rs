use crate::{
    actor::{Actor, ActorContext, ActorRef, actor::Flow, messages::WorkerMsg, spawn::spawn_actor},
    adapter::SourceAdapter,
    controller::MigrationController,
    error::{ActorError, MigrationError},
};
use async_trait::async_trait;
use engine_config::config::{DEFAULT_IDLE_TICK_MS, EngineConfig};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub idle_delay: Duration,
    /// Also run sequencer steps, so a run completes without a polling UI.
    pub advance_stages: bool,
    /// Exit once no task is active and the queue is empty.
    pub stop_when_idle: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_millis(DEFAULT_IDLE_TICK_MS),
            advance_stages: false,
            stop_when_idle: false,
        }
    }
}

impl WorkerOptions {
    /// Defaults with the idle delay taken from the engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            idle_delay: config.idle_tick,
            ..Self::default()
        }
    }
}

/// Background driver for one adapter's batch queue. Ticks back to back while
/// there is work, every `idle_delay` otherwise.
pub struct QueueWorker<A: SourceAdapter> {
    controller: MigrationController<A>,
    options: WorkerOptions,
}

impl<A: SourceAdapter> QueueWorker<A> {
    pub fn new(controller: MigrationController<A>, options: WorkerOptions) -> Self {
        Self { controller, options }
    }

    /// One unit of work. Returns whether anything happened.
    async fn work(&self) -> Result<bool, MigrationError> {
        let mut worked = false;
        if self.options.advance_stages {
            let cursor = self.controller.progress().last_seq().await?;
            worked |= self.controller.poll(cursor).await?.in_progress;
        }
        worked |= self.controller.drain_tick().await?;
        Ok(worked)
    }

    async fn tick(&self, ctx: &ActorContext<WorkerMsg>) -> Result<Flow, ActorError> {
        let worked = match self.work().await {
            Ok(worked) => worked,
            Err(e) => {
                error!(actor = ctx.name(), error = %e, "Worker tick failed; backing off");
                false
            }
        };

        if !worked && self.options.stop_when_idle {
            let active = self
                .controller
                .is_in_progress()
                .await
                .map_err(|e| ActorError::Internal(e.to_string()))?;
            if !active {
                info!(actor = ctx.name(), "Nothing left to do; worker stopping");
                return Ok(Flow::Stop);
            }
        }

        let delay = if worked { Duration::ZERO } else { self.options.idle_delay };
        ctx.send_after(WorkerMsg::Tick, delay);
        Ok(Flow::Continue)
    }
}

#[async_trait]
impl<A: SourceAdapter> Actor<WorkerMsg> for QueueWorker<A> {
    async fn on_start(&mut self, ctx: &ActorContext<WorkerMsg>) -> Result<(), ActorError> {
        info!(actor = ctx.name(), adapter = %self.controller.adapter_id(), "Queue worker started");
        ctx.send_after(WorkerMsg::Tick, Duration::ZERO);
        Ok(())
    }

    async fn handle(
        &mut self,
        msg: WorkerMsg,
        ctx: &ActorContext<WorkerMsg>,
    ) -> Result<Flow, ActorError> {
        match msg {
            WorkerMsg::Tick => self.tick(ctx).await,
            WorkerMsg::Stop => Ok(Flow::Stop),
        }
    }

    async fn on_stop(&mut self, ctx: &ActorContext<WorkerMsg>) -> Result<(), ActorError> {
        info!(actor = ctx.name(), shutdown = ctx.is_shutdown(), "Queue worker stopped");
        Ok(())
    }
}

/// Spawns a worker for `controller`. Send [`WorkerMsg::Stop`] or cancel
/// `shutdown` to end it; the handle resolves once it has stopped.
pub fn spawn_queue_worker<A: SourceAdapter>(
    controller: MigrationController<A>,
    options: WorkerOptions,
    shutdown: CancellationToken,
) -> (ActorRef<WorkerMsg>, JoinHandle<()>) {
    let name = format!("queue-worker:{}", controller.adapter_id());
    spawn_actor(name, 16, QueueWorker::new(controller, options), shutdown)
}
