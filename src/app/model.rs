use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque job identifier, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Crawling,
    Parsing,
    Saving,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Forward-only state machine: no backward moves, no skipped stages,
    /// except the terminal jump to `Error` from any active state.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Crawling)
                | (Crawling, Parsing)
                | (Parsing, Saving)
                | (Saving, Done)
                | (Queued | Crawling | Parsing | Saving, Error)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Crawling => "crawling",
            JobStatus::Parsing => "parsing",
            JobStatus::Saving => "saving",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One crawl attempt for one source URL.
///
/// Created `Queued` by the coordinator; mutated only by the crawl executor
/// afterwards; never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: JobId,
    pub source_url: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestionJob {
    pub fn new(source_url: &str) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            source_url: source_url.to_string(),
            status: JobStatus::Queued,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NovelId(pub u64);

impl fmt::Display for NovelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenreId(pub u64);

impl fmt::Display for GenreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalized novel ready for persistence. `slug` is the base slug; the
/// storage gateway resolves collisions against existing novels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovelDraft {
    pub source_url: String,
    pub title: String,
    pub slug: String,
    pub synopsis: String,
    pub status: String,
    pub word_count: u64,
    pub genres: Vec<String>,
    pub chapters: Vec<ChapterRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub number: u32,
    pub title: String,
    pub content: String,
    pub word_count: u64,
    pub source_url: String,
}

/// Stored novel row. Chapters live alongside it in the catalog; `genres`
/// holds canonical slugs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovelRecord {
    pub id: NovelId,
    pub source_url: String,
    pub title: String,
    pub slug: String,
    pub synopsis: String,
    pub status: String,
    pub word_count: u64,
    pub genres: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenreRecord {
    pub id: GenreId,
    pub name: String,
    pub slug: String,
}

/// A chapter that failed extraction. Recorded and logged; never fails the
/// job on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterFailure {
    pub number: u32,
    pub url: String,
    pub reason: String,
}

/// Summary of one successful ingestion, logged by the worker.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionOutcome {
    pub novel_id: NovelId,
    pub slug: String,
    pub chapters_saved: usize,
    pub chapters_failed: Vec<ChapterFailure>,
    pub word_count: u64,
}
