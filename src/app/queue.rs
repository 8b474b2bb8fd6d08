use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::app::fsjson::{read_json, write_json_atomic};
use crate::app::model::JobId;

/// What goes over the queue: a pointer into the job store, nothing more.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClaimedEntry {
    job_id: JobId,
    enqueued_at: DateTime<Utc>,
    claimed_at: DateTime<Utc>,
}

/// One dequeued entry. `receipt` identifies the claim for `ack`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job_id: JobId,
    pub receipt: String,
}

/// Durable, at-least-once delivery of job ids.
///
/// An entry claimed by one worker is invisible to the others; if the claim
/// is never acked it becomes deliverable again after a visibility timeout.
/// Consumers must tolerate redelivery of a job id they have already seen.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, job_id: &JobId) -> anyhow::Result<()>;
    /// Blocking pop with bounded latency: waits up to `wait` for an entry.
    async fn dequeue(&self, wait: Duration) -> anyhow::Result<Option<Delivery>>;
    async fn ack(&self, delivery: &Delivery) -> anyhow::Result<()>;
}

/// Work queue over the filesystem: one JSON file per entry, claims made by
/// atomic rename so exactly one of several concurrent workers wins.
#[derive(Debug)]
pub struct LocalFsWorkQueue {
    base_dir: PathBuf,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

impl LocalFsWorkQueue {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        poll_interval: Duration,
        visibility_timeout: Duration,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            poll_interval,
            visibility_timeout,
        }
    }

    fn entries_dir(&self) -> PathBuf {
        self.base_dir.join("queue").join("entries")
    }

    fn claimed_dir(&self) -> PathBuf {
        self.base_dir.join("queue").join("claimed")
    }

    async fn entry_names(dir: &Path) -> anyhow::Result<Vec<String>> {
        let mut reader = match fs::read_dir(dir).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("read dir: {}", dir.display())),
        };
        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await.context("iterate queue dir")? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".json") {
                    names.push(name.to_string());
                }
            }
        }
        // Entry names are prefixed with the enqueue timestamp, so
        // lexicographic order is FIFO order.
        names.sort();
        Ok(names)
    }

    async fn try_claim(&self) -> anyhow::Result<Option<Delivery>> {
        let entries_dir = self.entries_dir();
        let claimed_dir = self.claimed_dir();

        for name in Self::entry_names(&entries_dir).await? {
            let entry_path = entries_dir.join(&name);
            let claimed_path = claimed_dir.join(&name);

            fs::create_dir_all(&claimed_dir)
                .await
                .with_context(|| format!("create dir: {}", claimed_dir.display()))?;
            match fs::rename(&entry_path, &claimed_path).await {
                Ok(()) => {}
                // Another worker won this entry; try the next one.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("claim queue entry: {}", entry_path.display()));
                }
            }

            let Some(entry) = read_json::<QueueEntry>(&claimed_path)
                .await
                .with_context(|| format!("read claimed entry: {}", claimed_path.display()))?
            else {
                continue;
            };
            let claimed = ClaimedEntry {
                job_id: entry.job_id.clone(),
                enqueued_at: entry.enqueued_at,
                claimed_at: Utc::now(),
            };
            write_json_atomic(&claimed_path, &claimed)
                .await
                .context("stamp claimed entry")?;

            return Ok(Some(Delivery {
                job_id: entry.job_id,
                receipt: claimed_path.to_string_lossy().to_string(),
            }));
        }
        Ok(None)
    }

    /// Return expired claims to the deliverable pool. Called on every
    /// dequeue pass so an abandoned claim is bounded by the visibility
    /// timeout plus one poll interval.
    async fn reclaim_stale(&self) -> anyhow::Result<()> {
        let claimed_dir = self.claimed_dir();
        let entries_dir = self.entries_dir();
        let now = Utc::now();

        for name in Self::entry_names(&claimed_dir).await? {
            let claimed_path = claimed_dir.join(&name);
            let Some(claimed) = read_json::<ClaimedEntry>(&claimed_path)
                .await
                .with_context(|| format!("read claimed entry: {}", claimed_path.display()))?
            else {
                continue;
            };

            let age = now.signed_duration_since(claimed.claimed_at);
            if age.to_std().unwrap_or_default() < self.visibility_timeout {
                continue;
            }

            tracing::warn!(
                job_id = %claimed.job_id,
                "queue claim expired; redelivering"
            );
            let entry = QueueEntry {
                job_id: claimed.job_id,
                enqueued_at: claimed.enqueued_at,
            };
            write_json_atomic(&entries_dir.join(&name), &entry)
                .await
                .context("restore expired entry")?;
            match fs::remove_file(&claimed_path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("remove expired claim: {}", claimed_path.display())
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for LocalFsWorkQueue {
    async fn enqueue(&self, job_id: &JobId) -> anyhow::Result<()> {
        let entry = QueueEntry {
            job_id: job_id.clone(),
            enqueued_at: Utc::now(),
        };
        let name = format!(
            "{:020}-{}.json",
            entry.enqueued_at.timestamp_micros(),
            uuid::Uuid::new_v4().simple()
        );
        write_json_atomic(&self.entries_dir().join(name), &entry)
            .await
            .context("write queue entry")
    }

    async fn dequeue(&self, wait: Duration) -> anyhow::Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            self.reclaim_stale().await?;
            if let Some(delivery) = self.try_claim().await? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> anyhow::Result<()> {
        match fs::remove_file(Path::new(&delivery.receipt)).await {
            Ok(()) => Ok(()),
            // Already reclaimed after a visibility timeout; the status
            // guard downstream absorbs the redelivery.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("ack: {}", delivery.receipt)),
        }
    }
}

/// In-memory queue for tests and the in-process app mode.
#[derive(Debug, Default)]
pub struct MemoryWorkQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    notify: Notify,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn enqueue(&self, job_id: &JobId) -> anyhow::Result<()> {
        self.entries
            .lock()
            .expect("queue mutex poisoned")
            .push_back(QueueEntry {
                job_id: job_id.clone(),
                enqueued_at: Utc::now(),
            });
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> anyhow::Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(entry) = self
                .entries
                .lock()
                .expect("queue mutex poisoned")
                .pop_front()
            {
                return Ok(Some(Delivery {
                    job_id: entry.job_id,
                    receipt: String::new(),
                }));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn ack(&self, _delivery: &Delivery) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_queue_is_fifo() {
        let queue = MemoryWorkQueue::new();
        let first = JobId::generate();
        let second = JobId::generate();
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        let a = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        let b = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(a.job_id, first);
        assert_eq!(b.job_id, second);
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn localfs_queue_claims_each_entry_once() {
        let temp = tempfile::TempDir::new().unwrap();
        let queue = LocalFsWorkQueue::new(
            temp.path(),
            Duration::from_millis(10),
            Duration::from_secs(3600),
        );
        let job_id = JobId::generate();
        queue.enqueue(&job_id).await.unwrap();

        let delivery = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(delivery.job_id, job_id);

        // The claim hides the entry from other dequeuers.
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());

        queue.ack(&delivery).await.unwrap();
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn localfs_queue_redelivers_expired_claims() {
        let temp = tempfile::TempDir::new().unwrap();
        let queue = LocalFsWorkQueue::new(temp.path(), Duration::from_millis(10), Duration::ZERO);
        let job_id = JobId::generate();
        queue.enqueue(&job_id).await.unwrap();

        let first = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.job_id, job_id);

        // Claim never acked and the visibility timeout is zero, so the next
        // dequeue sees the entry again: at-least-once.
        let second = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(second.job_id, job_id);
    }

    #[tokio::test]
    async fn localfs_queue_survives_reopen() {
        let temp = tempfile::TempDir::new().unwrap();
        let job_id = JobId::generate();
        {
            let queue = LocalFsWorkQueue::new(
                temp.path(),
                Duration::from_millis(10),
                Duration::from_secs(3600),
            );
            queue.enqueue(&job_id).await.unwrap();
        }

        let reopened = LocalFsWorkQueue::new(
            temp.path(),
            Duration::from_millis(10),
            Duration::from_secs(3600),
        );
        let delivery = reopened.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(delivery.job_id, job_id);
    }

    #[tokio::test]
    async fn ack_tolerates_already_reclaimed_entries() {
        let temp = tempfile::TempDir::new().unwrap();
        let queue = LocalFsWorkQueue::new(temp.path(), Duration::from_millis(10), Duration::ZERO);
        let job_id = JobId::generate();
        queue.enqueue(&job_id).await.unwrap();

        let first = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        let second = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        queue.ack(&second).await.unwrap();
        queue.ack(&first).await.unwrap();
    }
}
