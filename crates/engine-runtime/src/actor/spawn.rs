use crate::actor::{Actor, ActorContext, ActorRef, actor::Flow};
use std::fmt::Debug;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Spawns the actor's event loop. The loop ends on [`Flow::Stop`] or when
/// `shutdown` fires; pending messages are dropped in the latter case.
pub fn spawn_actor<M, A>(
    name: impl Into<String>,
    mailbox_capacity: usize,
    mut actor: A,
    shutdown: CancellationToken,
) -> (ActorRef<M>, JoinHandle<()>)
where
    A: Actor<M>,
    M: Send + Debug + 'static,
{
    let (tx, mut rx) = mpsc::channel::<M>(mailbox_capacity.max(1));
    let actor_ref = ActorRef::new(name, tx);
    let ctx = ActorContext::new(actor_ref.clone(), shutdown.clone());

    let handle = tokio::spawn(async move {
        if let Err(e) = actor.on_start(&ctx).await {
            error!(actor = ctx.name(), ?e, "Actor failed to start");
            return;
        }

        loop {
            let msg = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(actor = ctx.name(), "Shutdown requested");
                    break;
                }
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            match actor.handle(msg, &ctx).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => error!(actor = ctx.name(), ?e, "Actor failed to handle message"),
            }
        }

        rx.close();
        if let Err(e) = actor.on_stop(&ctx).await {
            error!(actor = ctx.name(), ?e, "Actor failed to stop cleanly");
        }
    });

    (actor_ref, handle)
}
