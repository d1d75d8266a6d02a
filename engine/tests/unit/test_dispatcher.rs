//! Worker pool and startup reconciliation tests

use std::time::Duration;

use tokio::sync::broadcast;

use hostengine::models::deployment::{DeploymentPatch, DeploymentStatus, NewDeployment};
use hostengine::store::deployments::{DeploymentLedger, DeploymentStore};
use hostengine::workers::dispatcher::{self, TaskDispatcher};
use hostengine::workers::reconcile::{reconcile, INTERRUPTED_MESSAGE};

use crate::support::{project, FakeFetcher, FakeRuntime, Harness, RecordingDispatcher};

fn new_deployment(project_id: &str) -> NewDeployment {
    NewDeployment {
        project_id: project_id.to_string(),
        commit_hash: "abc".to_string(),
        commit_message: None,
        user_id: None,
    }
}

async fn wait_for_terminal(ledger: &dyn DeploymentLedger, id: &str) -> DeploymentStatus {
    let wait = async {
        loop {
            let status = ledger.get(id).await.unwrap().unwrap().status;
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("deployment did not finish")
}

#[tokio::test]
async fn test_pool_runs_enqueued_deployments() {
    let harness = Harness::new(
        vec![project("p1")],
        FakeFetcher::with_files(&[("dist/index.html", "hi")]),
        FakeRuntime::default(),
    );
    let (shutdown_tx, _) = broadcast::channel(1);
    let options = dispatcher::Options {
        workers: 2,
        queue_capacity: 8,
    };
    let (queue, pool) = dispatcher::start(&options, harness.pipeline.clone(), &shutdown_tx);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let deployment = harness.ledger.create(new_deployment("p1")).await.unwrap();
        queue.enqueue(&deployment.id).await.unwrap();
        ids.push(deployment.id);
    }

    for id in &ids {
        assert_eq!(
            wait_for_terminal(harness.ledger.as_ref(), id).await,
            DeploymentStatus::Ready
        );
    }

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), pool)
        .await
        .expect("pool did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_duplicate_enqueue_runs_once() {
    let harness = Harness::new(
        vec![project("p1")],
        FakeFetcher::with_files(&[("dist/index.html", "hi")]),
        FakeRuntime::default(),
    );
    let (shutdown_tx, _) = broadcast::channel(1);
    let (queue, pool) = dispatcher::start(
        &dispatcher::Options::default(),
        harness.pipeline.clone(),
        &shutdown_tx,
    );

    let deployment = harness.ledger.create(new_deployment("p1")).await.unwrap();
    queue.enqueue(&deployment.id).await.unwrap();
    queue.enqueue(&deployment.id).await.unwrap();

    wait_for_terminal(harness.ledger.as_ref(), &deployment.id).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.fetcher.fetched.lock().unwrap().len(), 1);

    shutdown_tx.send(()).unwrap();
    pool.await.unwrap();
}

#[tokio::test]
async fn test_enqueue_after_shutdown_fails() {
    let harness = Harness::new(vec![], FakeFetcher::default(), FakeRuntime::default());
    let (shutdown_tx, _) = broadcast::channel(1);
    let (queue, pool) = dispatcher::start(
        &dispatcher::Options::default(),
        harness.pipeline.clone(),
        &shutdown_tx,
    );

    shutdown_tx.send(()).unwrap();
    pool.await.unwrap();

    assert!(queue.enqueue("late").await.is_err());
}

#[tokio::test]
async fn test_reconcile_requeues_and_fails_interrupted() {
    let ledger = DeploymentStore::in_memory();
    let waiting_a = ledger.create(new_deployment("p1")).await.unwrap();
    let interrupted = ledger.create(new_deployment("p1")).await.unwrap();
    let waiting_b = ledger.create(new_deployment("p2")).await.unwrap();
    let finished = ledger.create(new_deployment("p2")).await.unwrap();

    ledger
        .update_status(&interrupted.id, DeploymentStatus::Building)
        .await
        .unwrap();
    ledger
        .update_status(&finished.id, DeploymentStatus::Building)
        .await
        .unwrap();
    ledger
        .update(&finished.id, DeploymentPatch::ready("http://localhost:1"))
        .await
        .unwrap();

    let queue = RecordingDispatcher::default();
    let report = reconcile(&ledger, &queue).await.unwrap();

    assert_eq!(report.requeued, vec![waiting_a.id.clone(), waiting_b.id.clone()]);
    assert_eq!(report.interrupted, vec![interrupted.id.clone()]);
    assert_eq!(queue.enqueued(), vec![waiting_a.id, waiting_b.id]);

    let failed = ledger.get(&interrupted.id).await.unwrap().unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));

    let untouched = ledger.get(&finished.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, DeploymentStatus::Ready);
}

#[tokio::test]
async fn test_reconcile_empty_ledger() {
    let ledger = DeploymentStore::in_memory();
    let queue = RecordingDispatcher::default();

    let report = reconcile(&ledger, &queue).await.unwrap();

    assert!(report.requeued.is_empty());
    assert!(report.interrupted.is_empty());
}
