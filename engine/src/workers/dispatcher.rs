//! Task dispatcher and bounded worker pool

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::deploy::pipeline::Pipeline;
use crate::errors::EngineError;

/// Dispatcher options
#[derive(Debug, Clone)]
pub struct Options {
    /// Number of pipelines that may run at once
    pub workers: usize,

    /// Deployment IDs that may wait in the queue before `enqueue` waits
    pub queue_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
        }
    }
}

/// Hands deployments to asynchronous execution
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Queue a deployment. Returns once queued, never after the build.
    async fn enqueue(&self, deployment_id: &str) -> Result<(), EngineError>;
}

/// Sending half of the worker queue
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl TaskDispatcher for Dispatcher {
    async fn enqueue(&self, deployment_id: &str) -> Result<(), EngineError> {
        self.tx
            .send(deployment_id.to_string())
            .await
            .map_err(|_| EngineError::DispatchError("worker queue is closed".to_string()))?;
        debug!(deployment_id = %deployment_id, "Deployment enqueued");
        Ok(())
    }
}

/// Start the worker pool.
///
/// Each worker takes one deployment at a time and runs its pipeline to a
/// terminal state. On shutdown, workers finish their current pipeline and
/// stop taking new ones.
pub fn start(
    options: &Options,
    pipeline: Arc<Pipeline>,
    shutdown_tx: &broadcast::Sender<()>,
) -> (Dispatcher, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
    let queue = Arc::new(Mutex::new(rx));
    let workers = options.workers.max(1);

    info!("Starting {} deployment worker(s)...", workers);
    let handles: Vec<JoinHandle<()>> = (0..workers)
        .map(|index| {
            tokio::spawn(run_worker(
                index,
                queue.clone(),
                pipeline.clone(),
                shutdown_tx.subscribe(),
            ))
        })
        .collect();

    let pool = tokio::spawn(async move {
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Deployment worker exited abnormally: {}", e);
            }
        }
        info!("Deployment workers stopped");
    });

    (Dispatcher { tx }, pool)
}

async fn run_worker(
    index: usize,
    queue: Arc<Mutex<mpsc::Receiver<String>>>,
    pipeline: Arc<Pipeline>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!("Deployment worker {} starting...", index);

    loop {
        let next = {
            let mut rx = queue.lock().await;
            tokio::select! {
                _ = shutdown_rx.recv() => None,
                id = rx.recv() => id,
            }
        };

        let Some(deployment_id) = next else {
            debug!("Deployment worker {} shutting down...", index);
            return;
        };

        // A panicking pipeline must not take the worker down with it
        let task_pipeline = pipeline.clone();
        let task_id = deployment_id.clone();
        let task = tokio::spawn(async move { task_pipeline.run(&task_id).await });

        match task.await {
            Ok(Ok(status)) => {
                info!(deployment_id = %deployment_id, "Pipeline finished: {}", status);
            }
            Ok(Err(e)) => {
                error!(deployment_id = %deployment_id, "Pipeline error: {}", e);
            }
            Err(e) => {
                error!(deployment_id = %deployment_id, "Pipeline task panicked: {}", e);
            }
        }
    }
}
