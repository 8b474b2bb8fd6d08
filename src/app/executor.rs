use std::sync::Arc;

use anyhow::Context as _;
use url::Url;

use crate::app::job_store::{JobStore, Transition};
use crate::app::model::{
    ChapterFailure, IngestionJob, IngestionOutcome, JobId, JobStatus, NovelDraft, NovelId,
};
use crate::app::storage::StorageGateway;
use crate::extractor::ExtractorRegistry;
use crate::normalize::{GenreLexicon, RawChapter, RawNovel, Sanitizer, normalize_novel};
use crate::sources::SourceRouter;

/// Drives one ingestion job end to end: claim, crawl, normalize, persist.
///
/// Every failure inside a job is converted into the job's terminal `error`
/// state here; nothing propagates out of [`run_job`], so one bad job can
/// never take a worker down with it.
///
/// [`run_job`]: CrawlExecutor::run_job
pub struct CrawlExecutor {
    router: SourceRouter,
    registry: ExtractorRegistry,
    sanitizer: Sanitizer,
    lexicon: GenreLexicon,
    job_store: Arc<dyn JobStore>,
    storage: Arc<dyn StorageGateway>,
}

impl CrawlExecutor {
    pub fn new(
        router: SourceRouter,
        registry: ExtractorRegistry,
        sanitizer: Sanitizer,
        lexicon: GenreLexicon,
        job_store: Arc<dyn JobStore>,
        storage: Arc<dyn StorageGateway>,
    ) -> Self {
        Self {
            router,
            registry,
            sanitizer,
            lexicon,
            job_store,
            storage,
        }
    }

    /// Execute the job, absorbing every failure into the job record.
    pub async fn run_job(&self, job_id: &JobId) {
        if let Err(err) = self.drive(job_id).await {
            tracing::error!(%job_id, ?err, "ingestion job failed");
            if let Err(store_err) = self.job_store.fail(job_id, &format!("{err:#}")).await {
                tracing::error!(%job_id, ?store_err, "failed to record job error");
            }
        }
    }

    async fn drive(&self, job_id: &JobId) -> anyhow::Result<()> {
        let Some(job) = self.job_store.get(job_id).await.context("load job")? else {
            tracing::warn!(%job_id, "dequeued unknown job id; dropping delivery");
            return Ok(());
        };

        // Claim the job before any extractor work. An at-least-once queue
        // may hand the same id to two workers; only the one that flips
        // queued -> crawling proceeds.
        match self
            .job_store
            .transition(job_id, JobStatus::Queued, JobStatus::Crawling)
            .await
            .context("claim job")?
        {
            Transition::Applied => {}
            Transition::Rejected { actual } => {
                tracing::info!(%job_id, status = %actual, "job not queued; skipping delivery");
                return Ok(());
            }
        }

        let (raw, failures) = self.crawl(&job).await?;

        self.advance(job_id, JobStatus::Crawling, JobStatus::Parsing)
            .await?;
        let draft = normalize_novel(&self.sanitizer, &self.lexicon, &raw);

        self.advance(job_id, JobStatus::Parsing, JobStatus::Saving)
            .await?;
        let novel_id = self.persist(&draft).await?;

        self.advance(job_id, JobStatus::Saving, JobStatus::Done)
            .await?;

        let outcome = IngestionOutcome {
            novel_id,
            slug: draft.slug.clone(),
            chapters_saved: draft.chapters.len(),
            chapters_failed: failures,
            word_count: draft.word_count,
        };
        tracing::info!(
            %job_id,
            novel_id = %outcome.novel_id,
            slug = %outcome.slug,
            chapters_saved = outcome.chapters_saved,
            chapters_failed = outcome.chapters_failed.len(),
            word_count = outcome.word_count,
            "ingestion job done"
        );
        Ok(())
    }

    /// Fetch everything the source has for this job.
    ///
    /// Metadata and the chapter list are load-bearing: if either cannot be
    /// read the whole job fails. Individual chapters are not: a failed
    /// chapter is recorded and skipped, and only a novel with no readable
    /// chapters at all fails the job.
    async fn crawl(
        &self,
        job: &IngestionJob,
    ) -> anyhow::Result<(RawNovel, Vec<ChapterFailure>)> {
        let url = Url::parse(&job.source_url).context("parse stored source url")?;
        let extractor_name = self
            .router
            .resolve(&url)
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        let extractor = self
            .registry
            .get(extractor_name)
            .ok_or_else(|| anyhow::anyhow!("extractor not registered: {extractor_name}"))?;

        let metadata = extractor
            .fetch_novel_metadata(&url)
            .await
            .context("fetch novel metadata")?;
        let chapter_refs = extractor
            .fetch_chapter_list(&url)
            .await
            .context("fetch chapter list")?;
        if chapter_refs.is_empty() {
            anyhow::bail!("source lists no chapters: {url}");
        }

        let mut chapters = Vec::with_capacity(chapter_refs.len());
        let mut failures = Vec::new();
        for chapter_ref in chapter_refs {
            let chapter_url = match Url::parse(&chapter_ref.url) {
                Ok(chapter_url) => chapter_url,
                Err(err) => {
                    let reason = format!("invalid chapter url: {err}");
                    tracing::warn!(
                        job_id = %job.id,
                        number = chapter_ref.number,
                        url = %chapter_ref.url,
                        %reason,
                        "skipping chapter"
                    );
                    failures.push(ChapterFailure {
                        number: chapter_ref.number,
                        url: chapter_ref.url,
                        reason,
                    });
                    continue;
                }
            };

            match extractor.fetch_chapter_content(&chapter_url).await {
                Ok(html) => chapters.push(RawChapter {
                    number: chapter_ref.number,
                    title: chapter_ref.title,
                    html,
                    source_url: chapter_ref.url,
                }),
                Err(err) => {
                    tracing::warn!(
                        job_id = %job.id,
                        number = chapter_ref.number,
                        url = %chapter_ref.url,
                        %err,
                        "chapter extraction failed; continuing"
                    );
                    failures.push(ChapterFailure {
                        number: chapter_ref.number,
                        url: chapter_ref.url,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if chapters.is_empty() {
            anyhow::bail!(
                "all {} chapters failed extraction for {url}",
                failures.len()
            );
        }

        Ok((
            RawNovel {
                source_url: job.source_url.clone(),
                title: metadata.title,
                synopsis: metadata.synopsis,
                status: metadata.status,
                genres: metadata.raw_genres,
                chapters,
            },
            failures,
        ))
    }

    /// Persist the whole ingestion attempt as one unit: the batch commits
    /// everything or nothing, so readers never observe a half-saved novel.
    async fn persist(&self, draft: &NovelDraft) -> anyhow::Result<NovelId> {
        let mut batch = self.storage.begin().await.context("begin storage batch")?;
        let novel_id = batch.upsert_novel(draft).await.context("upsert novel")?;
        batch
            .upsert_chapters(novel_id, &draft.chapters)
            .await
            .context("upsert chapters")?;
        let genre_ids = batch
            .upsert_genres(&draft.genres)
            .await
            .context("upsert genres")?;
        batch
            .link_novel_genres(novel_id, &genre_ids)
            .await
            .context("link novel genres")?;
        batch.commit().await.context("commit storage batch")?;
        Ok(novel_id)
    }

    async fn advance(&self, job_id: &JobId, from: JobStatus, to: JobStatus) -> anyhow::Result<()> {
        match self
            .job_store
            .transition(job_id, from, to)
            .await
            .with_context(|| format!("transition {from} -> {to}"))?
        {
            Transition::Applied => Ok(()),
            Transition::Rejected { actual } => {
                anyhow::bail!("lost job ownership: expected {from}, found {actual}")
            }
        }
    }
}
