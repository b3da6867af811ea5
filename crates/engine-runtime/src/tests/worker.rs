use super::{Fanout, Harness, Letter, Toy};
use crate::{
    actor::{
        messages::WorkerMsg,
        worker::{WorkerOptions, spawn_queue_worker},
    },
    adapter::StagePlan,
};
use model::execution::settings::ImportSettings;
use std::{sync::atomic::Ordering, time::Duration};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn options() -> WorkerOptions {
    WorkerOptions {
        idle_delay: Duration::from_millis(10),
        advance_stages: true,
        stop_when_idle: true,
    }
}

#[tokio::test]
async fn worker_drains_queue_and_stops_when_idle() {
    let harness = Harness::new();
    let toy = Toy::new(120, || {
        StagePlan::builder().stage(Letter::A, Fanout { total: 120 }).build()
    });
    let jobs_run = toy.jobs_run.clone();
    let controller = harness.register(toy);

    controller.start(ImportSettings::new(), vec![]).await.unwrap();

    let (_worker, handle) =
        spawn_queue_worker(controller.clone(), options(), CancellationToken::new());
    timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();

    assert_eq!(jobs_run.load(Ordering::SeqCst), 3);
    assert!(!controller.is_in_progress().await.unwrap());
    assert_eq!(controller.progress().totals().await.unwrap().succeeded, 120);

    let logs = controller.progress().get_logs(0).await.unwrap();
    assert!(logs.entries.iter().any(|e| e.message.starts_with("Migration completed")));
}

#[tokio::test]
async fn worker_honours_shutdown() {
    let harness = Harness::new();
    let toy = Toy::new(120, || {
        StagePlan::builder().stage(Letter::A, Fanout { total: 120 }).build()
    });
    let jobs_run = toy.jobs_run.clone();
    let controller = harness.register(toy);
    controller.start(ImportSettings::new(), vec![]).await.unwrap();

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let (_worker, handle) = spawn_queue_worker(controller.clone(), options(), shutdown);
    timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();

    assert_eq!(jobs_run.load(Ordering::SeqCst), 0);
    assert_eq!(controller.queue().pending().await.unwrap(), 3);
}

#[tokio::test]
async fn worker_stops_on_request() {
    let harness = Harness::new();
    let toy = Toy::new(0, || StagePlan::builder().stage(Letter::A, Fanout { total: 0 }).build());
    let controller = harness.register(toy);

    let options = WorkerOptions {
        stop_when_idle: false,
        ..options()
    };
    let (worker, handle) = spawn_queue_worker(controller, options, CancellationToken::new());
    worker.send(WorkerMsg::Stop).await.unwrap();

    timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
    assert!(worker.send(WorkerMsg::Tick).await.is_err());
}

#[test]
fn idle_delay_follows_engine_config() {
    let mut config = engine_config::config::EngineConfig::with_state_dir("/tmp/listmig");
    config.idle_tick = Duration::from_millis(75);

    let options = WorkerOptions::from_config(&config);
    assert_eq!(options.idle_delay, Duration::from_millis(75));
    assert!(!options.advance_stages);
    assert!(!options.stop_when_idle);
}
