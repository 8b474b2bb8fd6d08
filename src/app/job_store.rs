use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;

use crate::app::fsjson::{read_json, write_json_atomic};
use crate::app::model::{IngestionJob, JobId, JobStatus};

/// Result of a compare-and-set status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The stored status did not match the expected one; nothing changed.
    /// The duplicate-delivery guard in the executor relies on this.
    Rejected { actual: JobStatus },
}

/// Durable record of every ingestion job. The relational datastore behind
/// this contract is a collaborator; the engine only needs create/get/list
/// plus an atomic compare-and-set transition.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &IngestionJob) -> anyhow::Result<()>;
    async fn get(&self, id: &JobId) -> anyhow::Result<Option<IngestionJob>>;
    /// Newest first.
    async fn list(&self, limit: usize) -> anyhow::Result<Vec<IngestionJob>>;
    /// Atomically move `id` from `from` to `to`, bumping `updated_at`.
    /// An illegal transition is an error; a status mismatch is `Rejected`.
    async fn transition(&self, id: &JobId, from: JobStatus, to: JobStatus)
    -> anyhow::Result<Transition>;
    /// Terminal-error jump from whatever active state the job is in.
    /// A job already in a terminal state is left untouched.
    async fn fail(&self, id: &JobId, message: &str) -> anyhow::Result<()>;
}

fn apply_transition(
    job: &mut IngestionJob,
    from: JobStatus,
    to: JobStatus,
) -> anyhow::Result<Transition> {
    if job.status != from {
        return Ok(Transition::Rejected { actual: job.status });
    }
    if !from.can_transition_to(to) {
        anyhow::bail!("illegal job transition: {from} -> {to}");
    }
    job.status = to;
    job.updated_at = Utc::now();
    Ok(Transition::Applied)
}

fn apply_failure(job: &mut IngestionJob, message: &str) -> bool {
    if job.status.is_terminal() {
        tracing::warn!(
            job_id = %job.id,
            status = %job.status,
            "refusing to mark terminal job as error"
        );
        return false;
    }
    job.status = JobStatus::Error;
    job.error_message = Some(message.to_string());
    job.updated_at = Utc::now();
    true
}

/// Job store over one `job.json` per job, written atomically. The mutex
/// makes compare-and-set transitions atomic within this process; exclusive
/// job ownership across processes comes from the queue's delivery contract.
#[derive(Debug)]
pub struct LocalFsJobStore {
    base_dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl LocalFsJobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn jobs_dir(&self) -> PathBuf {
        self.base_dir.join("jobs")
    }

    fn job_json_path(&self, id: &JobId) -> PathBuf {
        self.jobs_dir().join(id.as_str()).join("job.json")
    }

    async fn load(&self, id: &JobId) -> anyhow::Result<Option<IngestionJob>> {
        let path = self.job_json_path(id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn save(&self, job: &IngestionJob) -> anyhow::Result<()> {
        write_json_atomic(&self.job_json_path(&job.id), job)
            .await
            .context("write job.json")
    }
}

#[async_trait]
impl JobStore for LocalFsJobStore {
    async fn create(&self, job: &IngestionJob) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.load(&job.id).await?.is_some() {
            anyhow::bail!("job already exists: {}", job.id);
        }
        self.save(job).await
    }

    async fn get(&self, id: &JobId) -> anyhow::Result<Option<IngestionJob>> {
        self.load(id).await
    }

    async fn list(&self, limit: usize) -> anyhow::Result<Vec<IngestionJob>> {
        let jobs_dir = self.jobs_dir();
        let mut entries = match fs::read_dir(&jobs_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read dir: {}", jobs_dir.display()));
            }
        };

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("iterate jobs dir")? {
            let job_path = entry.path().join("job.json");
            if let Some(job) = read_json::<IngestionJob>(&job_path)
                .await
                .with_context(|| format!("read: {}", job_path.display()))?
            {
                jobs.push(job);
            }
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn transition(
        &self,
        id: &JobId,
        from: JobStatus,
        to: JobStatus,
    ) -> anyhow::Result<Transition> {
        let _guard = self.write_lock.lock().await;
        let mut job = self
            .load(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job not found: {id}"))?;
        let outcome = apply_transition(&mut job, from, to)?;
        if outcome == Transition::Applied {
            self.save(&job).await?;
        }
        Ok(outcome)
    }

    async fn fail(&self, id: &JobId, message: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut job = self
            .load(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job not found: {id}"))?;
        if apply_failure(&mut job, message) {
            self.save(&job).await?;
        }
        Ok(())
    }
}

/// In-memory job store for tests and the in-process app mode.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, IngestionJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &IngestionJob) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().expect("job store mutex poisoned");
        if jobs.contains_key(&job.id) {
            anyhow::bail!("job already exists: {}", job.id);
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> anyhow::Result<Option<IngestionJob>> {
        let jobs = self.jobs.lock().expect("job store mutex poisoned");
        Ok(jobs.get(id).cloned())
    }

    async fn list(&self, limit: usize) -> anyhow::Result<Vec<IngestionJob>> {
        let jobs = self.jobs.lock().expect("job store mutex poisoned");
        let mut jobs: Vec<IngestionJob> = jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn transition(
        &self,
        id: &JobId,
        from: JobStatus,
        to: JobStatus,
    ) -> anyhow::Result<Transition> {
        let mut jobs = self.jobs.lock().expect("job store mutex poisoned");
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("job not found: {id}"))?;
        apply_transition(job, from, to)
    }

    async fn fail(&self, id: &JobId, message: &str) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().expect("job store mutex poisoned");
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("job not found: {id}"))?;
        apply_failure(job, message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transition_applies_only_from_expected_status() {
        let store = MemoryJobStore::new();
        let job = IngestionJob::new("https://example.com/novel/1");
        store.create(&job).await.unwrap();

        let applied = store
            .transition(&job.id, JobStatus::Queued, JobStatus::Crawling)
            .await
            .unwrap();
        assert_eq!(applied, Transition::Applied);

        // Second delivery of the same job id must be rejected, not replayed.
        let rejected = store
            .transition(&job.id, JobStatus::Queued, JobStatus::Crawling)
            .await
            .unwrap();
        assert_eq!(
            rejected,
            Transition::Rejected {
                actual: JobStatus::Crawling
            }
        );
    }

    #[tokio::test]
    async fn transition_bumps_updated_at() {
        let store = MemoryJobStore::new();
        let job = IngestionJob::new("https://example.com/novel/1");
        store.create(&job).await.unwrap();
        let before = store.get(&job.id).await.unwrap().unwrap().updated_at;

        store
            .transition(&job.id, JobStatus::Queued, JobStatus::Crawling)
            .await
            .unwrap();
        let after = store.get(&job.id).await.unwrap().unwrap().updated_at;
        assert!(after >= before);
    }

    #[tokio::test]
    async fn illegal_transition_is_an_error() {
        let store = MemoryJobStore::new();
        let job = IngestionJob::new("https://example.com/novel/1");
        store.create(&job).await.unwrap();

        let err = store
            .transition(&job.id, JobStatus::Queued, JobStatus::Done)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("illegal job transition"));
    }

    #[tokio::test]
    async fn fail_sets_error_and_message_but_never_touches_terminal_jobs() {
        let store = MemoryJobStore::new();
        let job = IngestionJob::new("https://example.com/novel/1");
        store.create(&job).await.unwrap();

        store.fail(&job.id, "boom").await.unwrap();
        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Error);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));

        store.fail(&job.id, "boom again").await.unwrap();
        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn localfs_store_round_trips_jobs() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = LocalFsJobStore::new(temp.path());

        let job = IngestionJob::new("https://example.com/novel/7");
        store.create(&job).await.unwrap();

        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.source_url, job.source_url);
        assert_eq!(loaded.status, JobStatus::Queued);

        store
            .transition(&job.id, JobStatus::Queued, JobStatus::Crawling)
            .await
            .unwrap();
        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Crawling);

        let listed = store.list(10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn localfs_create_rejects_duplicate_ids() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = LocalFsJobStore::new(temp.path());
        let job = IngestionJob::new("https://example.com/novel/7");
        store.create(&job).await.unwrap();
        assert!(store.create(&job).await.is_err());
    }
}
