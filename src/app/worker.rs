use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::app::executor::CrawlExecutor;
use crate::app::job_store::JobStore;
use crate::app::queue::{Delivery, WorkQueue};

/// Long-running loop: dequeue a job id, run it to a terminal state, ack,
/// repeat. One job at a time per worker; horizontal throughput comes from
/// running more worker processes, which share nothing but the queue and
/// the job store.
pub struct Worker {
    queue: Arc<dyn WorkQueue>,
    job_store: Arc<dyn JobStore>,
    executor: Arc<CrawlExecutor>,
    job_timeout: Duration,
    dequeue_wait: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        job_store: Arc<dyn JobStore>,
        executor: Arc<CrawlExecutor>,
        job_timeout: Duration,
        dequeue_wait: Duration,
    ) -> Self {
        Self {
            queue,
            job_store,
            executor,
            job_timeout,
            dequeue_wait,
        }
    }

    /// Run until `shutdown` flips to true. Never returns early on job
    /// failures; a failed job only marks its own record.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("worker ready; waiting for jobs");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                dequeued = self.queue.dequeue(self.dequeue_wait) => match dequeued {
                    Ok(Some(delivery)) => self.process(delivery).await,
                    Ok(None) => {}
                    Err(err) => {
                        tracing::error!(?err, "dequeue failed; backing off");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }
        tracing::info!("worker stopped");
    }

    async fn process(&self, delivery: Delivery) {
        let job_id = delivery.job_id.clone();
        tracing::info!(%job_id, "job dequeued");

        // Extractor work is unbounded external I/O; a hung fetch must not
        // hold the worker past the configured bound.
        match tokio::time::timeout(self.job_timeout, self.executor.run_job(&job_id)).await {
            Ok(()) => {}
            Err(_elapsed) => {
                let message = format!(
                    "job execution timed out after {}s",
                    self.job_timeout.as_secs()
                );
                tracing::warn!(%job_id, %message, "job timed out");
                if let Err(err) = self.job_store.fail(&job_id, &message).await {
                    tracing::error!(%job_id, ?err, "failed to record job timeout");
                }
            }
        }

        // Acked even after a timeout: the engine never auto-retries, a
        // fresh attempt is an operator re-enqueue with a new job id.
        if let Err(err) = self.queue.ack(&delivery).await {
            tracing::error!(%job_id, ?err, "failed to ack delivery");
        }
    }
}
