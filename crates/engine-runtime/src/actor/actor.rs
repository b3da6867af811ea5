use crate::error::ActorError;
use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What the event loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Passed to every callback. Holds the actor's own mailbox, so an actor can
/// re-arm itself, and the shutdown token it was spawned with.
pub struct ActorContext<M>
where
    M: Send + Debug + 'static,
{
    myself: ActorRef<M>,
    shutdown: CancellationToken,
}

impl<M> ActorContext<M>
where
    M: Send + Debug + 'static,
{
    pub(crate) fn new(myself: ActorRef<M>, shutdown: CancellationToken) -> Self {
        Self { myself, shutdown }
    }

    pub fn name(&self) -> &str {
        self.myself.name()
    }

    pub fn myself(&self) -> &ActorRef<M> {
        &self.myself
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Delivers `msg` to this actor once `delay` has passed. Dropped if the
    /// actor has stopped by then.
    pub fn send_after(&self, msg: M, delay: Duration) {
        let myself = self.myself.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if myself.send(msg).await.is_err() {
                debug!(actor = myself.name(), "Mailbox closed; delayed message dropped");
            }
        });
    }
}

/// A mailbox-driven task. `on_start` runs once, then `handle` once per
/// message until it returns [`Flow::Stop`] or shutdown is requested, then
/// `on_stop`.
#[async_trait]
pub trait Actor<M>: Send + 'static
where
    M: Send + Debug + 'static,
{
    async fn on_start(&mut self, _ctx: &ActorContext<M>) -> Result<(), ActorError> {
        Ok(())
    }

    async fn handle(&mut self, msg: M, ctx: &ActorContext<M>) -> Result<Flow, ActorError>;

    async fn on_stop(&mut self, _ctx: &ActorContext<M>) -> Result<(), ActorError> {
        Ok(())
    }
}

/// Sending side of an actor's mailbox.
#[derive(Debug)]
pub struct ActorRef<M>
where
    M: Send + Debug + 'static,
{
    name: Arc<str>,
    tx: mpsc::Sender<M>,
}

impl<M> Clone for ActorRef<M>
where
    M: Send + Debug + 'static,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<M> ActorRef<M>
where
    M: Send + Debug + 'static,
{
    pub(crate) fn new(name: impl Into<String>, tx: mpsc::Sender<M>) -> Self {
        Self {
            name: Arc::from(name.into()),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.send(msg).await.map_err(|_| ActorError::MailboxClosed)
    }
}
