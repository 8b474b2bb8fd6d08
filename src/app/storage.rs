use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;

use crate::app::fsjson::{read_json, write_json_atomic};
use crate::app::model::{
    ChapterRecord, GenreId, GenreRecord, NovelDraft, NovelId, NovelRecord,
};
use crate::error::PersistenceError;
use crate::normalize::{disambiguate, genre_display_name};

/// Transactional boundary for canonical records.
///
/// The saving phase of a job runs entirely inside one batch: nothing a
/// batch writes is visible to readers until `commit`, and a dropped batch
/// leaves no trace. Batches are serialized per gateway, so an open batch
/// never loses a neighbour's committed writes.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn begin(&self) -> anyhow::Result<Box<dyn StorageBatch>>;

    async fn novels(&self) -> anyhow::Result<Vec<NovelRecord>>;
    async fn chapters(&self, novel: NovelId) -> anyhow::Result<Vec<ChapterRecord>>;
    async fn genres(&self) -> anyhow::Result<Vec<GenreRecord>>;
}

/// One ingestion attempt's unit of work. Each call is atomic on its own;
/// `commit` makes the whole set visible at once.
#[async_trait]
pub trait StorageBatch: Send {
    /// Create or update the novel keyed by its source URL. A new novel gets
    /// the draft's slug, disambiguated against every other novel; an
    /// existing novel keeps its slug.
    async fn upsert_novel(&mut self, draft: &NovelDraft) -> Result<NovelId, PersistenceError>;
    /// Replace the novel's chapter set, keyed by `(novel, number)`.
    async fn upsert_chapters(
        &mut self,
        novel: NovelId,
        chapters: &[ChapterRecord],
    ) -> Result<(), PersistenceError>;
    /// Get-or-create genres by canonical slug; ids returned in input order.
    async fn upsert_genres(&mut self, slugs: &[String]) -> Result<Vec<GenreId>, PersistenceError>;
    async fn link_novel_genres(
        &mut self,
        novel: NovelId,
        genres: &[GenreId],
    ) -> Result<(), PersistenceError>;
    async fn commit(self: Box<Self>) -> Result<(), PersistenceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredNovel {
    record: NovelRecord,
    chapters: Vec<ChapterRecord>,
}

/// The whole canonical dataset. Batches stage a copy and swap it in on
/// commit; id counters start at 1 like any ordinary sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Catalog {
    next_novel_id: u64,
    next_genre_id: u64,
    novels: Vec<StoredNovel>,
    genres: Vec<GenreRecord>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            next_novel_id: 1,
            next_genre_id: 1,
            novels: Vec::new(),
            genres: Vec::new(),
        }
    }
}

impl Catalog {
    fn upsert_novel(&mut self, draft: &NovelDraft) -> NovelId {
        let now = Utc::now();
        if let Some(existing) = self
            .novels
            .iter_mut()
            .find(|novel| novel.record.source_url == draft.source_url)
        {
            let record = &mut existing.record;
            record.title = draft.title.clone();
            record.synopsis = draft.synopsis.clone();
            record.status = draft.status.clone();
            record.word_count = draft.word_count;
            record.updated_at = now;
            return record.id;
        }

        let slug = disambiguate(&draft.slug, |candidate| {
            self.novels.iter().any(|novel| novel.record.slug == candidate)
        });
        let id = NovelId(self.next_novel_id);
        self.next_novel_id += 1;
        self.novels.push(StoredNovel {
            record: NovelRecord {
                id,
                source_url: draft.source_url.clone(),
                title: draft.title.clone(),
                slug,
                synopsis: draft.synopsis.clone(),
                status: draft.status.clone(),
                word_count: draft.word_count,
                genres: Vec::new(),
                created_at: now,
                updated_at: now,
            },
            chapters: Vec::new(),
        });
        id
    }

    fn upsert_chapters(
        &mut self,
        novel: NovelId,
        chapters: &[ChapterRecord],
    ) -> Result<(), PersistenceError> {
        let stored = self
            .novels
            .iter_mut()
            .find(|candidate| candidate.record.id == novel)
            .ok_or_else(|| PersistenceError::new(format!("unknown novel id: {novel}")))?;
        let mut chapters: Vec<ChapterRecord> = chapters.to_vec();
        chapters.sort_by_key(|chapter| chapter.number);
        stored.chapters = chapters;
        Ok(())
    }

    fn upsert_genres(&mut self, slugs: &[String]) -> Vec<GenreId> {
        slugs
            .iter()
            .map(|slug| {
                if let Some(genre) = self.genres.iter().find(|genre| genre.slug == *slug) {
                    return genre.id;
                }
                let id = GenreId(self.next_genre_id);
                self.next_genre_id += 1;
                self.genres.push(GenreRecord {
                    id,
                    name: genre_display_name(slug),
                    slug: slug.clone(),
                });
                id
            })
            .collect()
    }

    fn link_novel_genres(
        &mut self,
        novel: NovelId,
        genre_ids: &[GenreId],
    ) -> Result<(), PersistenceError> {
        let mut slugs = Vec::with_capacity(genre_ids.len());
        for id in genre_ids {
            let genre = self
                .genres
                .iter()
                .find(|genre| genre.id == *id)
                .ok_or_else(|| PersistenceError::new(format!("unknown genre id: {id}")))?;
            slugs.push(genre.slug.clone());
        }
        slugs.sort();
        slugs.dedup();

        let stored = self
            .novels
            .iter_mut()
            .find(|candidate| candidate.record.id == novel)
            .ok_or_else(|| PersistenceError::new(format!("unknown novel id: {novel}")))?;
        stored.record.genres = slugs;
        Ok(())
    }
}

/// Storage gateway over a single JSON catalog file, committed by atomic
/// rename. Readers load the file directly, so an open batch is invisible
/// to them until it commits.
#[derive(Debug)]
pub struct LocalFsStorageGateway {
    catalog_path: PathBuf,
    batch_gate: Arc<tokio::sync::Mutex<()>>,
}

impl LocalFsStorageGateway {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: base_dir.into().join("catalog.json"),
            batch_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    async fn load(&self) -> anyhow::Result<Catalog> {
        Ok(read_json(&self.catalog_path).await?.unwrap_or_default())
    }
}

#[async_trait]
impl StorageGateway for LocalFsStorageGateway {
    async fn begin(&self) -> anyhow::Result<Box<dyn StorageBatch>> {
        let guard = Arc::clone(&self.batch_gate).lock_owned().await;
        let staged = self.load().await?;
        Ok(Box::new(LocalFsBatch {
            staged,
            catalog_path: self.catalog_path.clone(),
            _guard: guard,
        }))
    }

    async fn novels(&self) -> anyhow::Result<Vec<NovelRecord>> {
        Ok(self.load().await?.novels.into_iter().map(|n| n.record).collect())
    }

    async fn chapters(&self, novel: NovelId) -> anyhow::Result<Vec<ChapterRecord>> {
        Ok(self
            .load()
            .await?
            .novels
            .into_iter()
            .find(|candidate| candidate.record.id == novel)
            .map(|stored| stored.chapters)
            .unwrap_or_default())
    }

    async fn genres(&self) -> anyhow::Result<Vec<GenreRecord>> {
        Ok(self.load().await?.genres)
    }
}

struct LocalFsBatch {
    staged: Catalog,
    catalog_path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl StorageBatch for LocalFsBatch {
    async fn upsert_novel(&mut self, draft: &NovelDraft) -> Result<NovelId, PersistenceError> {
        Ok(self.staged.upsert_novel(draft))
    }

    async fn upsert_chapters(
        &mut self,
        novel: NovelId,
        chapters: &[ChapterRecord],
    ) -> Result<(), PersistenceError> {
        self.staged.upsert_chapters(novel, chapters)
    }

    async fn upsert_genres(&mut self, slugs: &[String]) -> Result<Vec<GenreId>, PersistenceError> {
        Ok(self.staged.upsert_genres(slugs))
    }

    async fn link_novel_genres(
        &mut self,
        novel: NovelId,
        genres: &[GenreId],
    ) -> Result<(), PersistenceError> {
        self.staged.link_novel_genres(novel, genres)
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        write_json_atomic(&self.catalog_path, &self.staged)
            .await
            .map_err(|err| PersistenceError::new(format!("commit catalog: {err:#}")))
    }
}

/// In-memory gateway for tests and the in-process app mode.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    catalog: Arc<Mutex<Catalog>>,
    batch_gate: Arc<tokio::sync::Mutex<()>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageGateway for MemoryStorage {
    async fn begin(&self) -> anyhow::Result<Box<dyn StorageBatch>> {
        let guard = Arc::clone(&self.batch_gate).lock_owned().await;
        let staged = self
            .catalog
            .lock()
            .expect("storage mutex poisoned")
            .clone();
        Ok(Box::new(MemoryBatch {
            staged,
            shared: Arc::clone(&self.catalog),
            _guard: guard,
        }))
    }

    async fn novels(&self) -> anyhow::Result<Vec<NovelRecord>> {
        let catalog = self.catalog.lock().expect("storage mutex poisoned");
        Ok(catalog.novels.iter().map(|n| n.record.clone()).collect())
    }

    async fn chapters(&self, novel: NovelId) -> anyhow::Result<Vec<ChapterRecord>> {
        let catalog = self.catalog.lock().expect("storage mutex poisoned");
        Ok(catalog
            .novels
            .iter()
            .find(|candidate| candidate.record.id == novel)
            .map(|stored| stored.chapters.clone())
            .unwrap_or_default())
    }

    async fn genres(&self) -> anyhow::Result<Vec<GenreRecord>> {
        let catalog = self.catalog.lock().expect("storage mutex poisoned");
        Ok(catalog.genres.clone())
    }
}

struct MemoryBatch {
    staged: Catalog,
    shared: Arc<Mutex<Catalog>>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl StorageBatch for MemoryBatch {
    async fn upsert_novel(&mut self, draft: &NovelDraft) -> Result<NovelId, PersistenceError> {
        Ok(self.staged.upsert_novel(draft))
    }

    async fn upsert_chapters(
        &mut self,
        novel: NovelId,
        chapters: &[ChapterRecord],
    ) -> Result<(), PersistenceError> {
        self.staged.upsert_chapters(novel, chapters)
    }

    async fn upsert_genres(&mut self, slugs: &[String]) -> Result<Vec<GenreId>, PersistenceError> {
        Ok(self.staged.upsert_genres(slugs))
    }

    async fn link_novel_genres(
        &mut self,
        novel: NovelId,
        genres: &[GenreId],
    ) -> Result<(), PersistenceError> {
        self.staged.link_novel_genres(novel, genres)
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        let MemoryBatch {
            staged,
            shared,
            _guard,
        } = *self;
        *shared.lock().expect("storage mutex poisoned") = staged;
        Ok(())
    }
}
