use std::sync::Arc;

use anyhow::Context as _;

use crate::app::job_store::JobStore;
use crate::app::model::{IngestionJob, JobId, JobStatus};
use crate::app::queue::WorkQueue;
use crate::error::IngestError;
use crate::sources::SourceRouter;

/// Enqueue-side contract used by the API layer and the CLI.
///
/// Owns the invariant that a job row exists in the job store before its
/// queue entry, so whichever worker dequeues the id can always load the
/// job's metadata.
pub struct QueueCoordinator {
    router: SourceRouter,
    job_store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
}

impl QueueCoordinator {
    pub fn new(
        router: SourceRouter,
        job_store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            router,
            job_store,
            queue,
        }
    }

    /// Create and enqueue a job for `source_url`.
    ///
    /// Unsupported or unparseable URLs are rejected here, before any job
    /// row or queue entry exists; a worker slot is never spent on a URL no
    /// extractor can serve. Re-submitting a URL that was ingested before
    /// is allowed and creates a fresh job.
    pub async fn create_job(&self, source_url: &str) -> Result<IngestionJob, IngestError> {
        let (url, extractor) = self.router.resolve_str(source_url)?;

        let job = IngestionJob::new(url.as_str());
        self.job_store
            .create(&job)
            .await
            .context("create job row")?;
        self.queue
            .enqueue(&job.id)
            .await
            .context("enqueue job id")?;

        tracing::info!(job_id = %job.id, url = %url, %extractor, "ingestion job queued");
        Ok(job)
    }

    pub async fn job_status(&self, id: &JobId) -> anyhow::Result<Option<IngestionJob>> {
        self.job_store.get(id).await
    }

    pub async fn list_jobs(&self, limit: usize) -> anyhow::Result<Vec<IngestionJob>> {
        self.job_store.list(limit).await
    }

    /// Re-enqueue every job still sitting in `queued`.
    ///
    /// Recovery helper for entries lost to a broken queue backend. Safe to
    /// run at any time: a duplicate entry for a job that was delivered in
    /// the meantime bounces off the executor's status guard.
    pub async fn requeue_pending(&self) -> anyhow::Result<usize> {
        let jobs = self.job_store.list(usize::MAX).await.context("list jobs")?;
        let mut requeued = 0usize;
        for job in jobs {
            if job.status != JobStatus::Queued {
                continue;
            }
            self.queue
                .enqueue(&job.id)
                .await
                .with_context(|| format!("re-enqueue job {}", job.id))?;
            requeued += 1;
        }
        tracing::info!(requeued, "requeued pending jobs");
        Ok(requeued)
    }
}
