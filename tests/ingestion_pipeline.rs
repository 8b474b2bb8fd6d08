use std::sync::Arc;
use std::time::Duration;

use novelpress::app::coordinator::QueueCoordinator;
use novelpress::app::executor::CrawlExecutor;
use novelpress::app::job_store::{JobStore, MemoryJobStore};
use novelpress::app::model::{JobStatus, NovelId};
use novelpress::app::queue::{MemoryWorkQueue, WorkQueue};
use novelpress::app::storage::{MemoryStorage, StorageGateway};
use novelpress::app::worker::Worker;
use novelpress::extractor::{ChapterRef, Extractor, ExtractorRegistry, NovelMetadata};
use novelpress::normalize::{GenreLexicon, Sanitizer};
use novelpress::sources::{SourceCatalog, SourceRouter};
use novelpress::testing::ScriptedExtractor;
use tokio::sync::watch;

const NOVEL_URL: &str = "https://example.com/novel/1";

struct Harness {
    coordinator: QueueCoordinator,
    executor: Arc<CrawlExecutor>,
    job_store: Arc<MemoryJobStore>,
    queue: Arc<MemoryWorkQueue>,
    storage: Arc<MemoryStorage>,
    extractor: Arc<ScriptedExtractor>,
}

fn harness() -> Harness {
    let catalog = SourceCatalog::builtin();
    let router = SourceRouter::new(&catalog);

    let extractor = Arc::new(ScriptedExtractor::new());
    let mut registry = ExtractorRegistry::new();
    registry.register(
        "example_site",
        Arc::clone(&extractor) as Arc<dyn Extractor>,
    );

    let job_store = Arc::new(MemoryJobStore::new());
    let queue = Arc::new(MemoryWorkQueue::new());
    let storage = Arc::new(MemoryStorage::new());

    let coordinator = QueueCoordinator::new(
        router.clone(),
        Arc::clone(&job_store) as Arc<dyn JobStore>,
        Arc::clone(&queue) as Arc<dyn WorkQueue>,
    );
    let executor = Arc::new(CrawlExecutor::new(
        router,
        registry,
        Sanitizer::new().unwrap(),
        GenreLexicon::builtin(),
        Arc::clone(&job_store) as Arc<dyn JobStore>,
        Arc::clone(&storage) as Arc<dyn StorageGateway>,
    ));

    Harness {
        coordinator,
        executor,
        job_store,
        queue,
        storage,
        extractor,
    }
}

fn script_novel(extractor: &ScriptedExtractor, url: &str, title: &str, genres: &[&str]) {
    extractor.script_metadata(
        url,
        NovelMetadata {
            title: title.to_string(),
            synopsis: "A story about stories.".to_string(),
            status: "Ongoing".to_string(),
            raw_genres: genres.iter().map(|genre| genre.to_string()).collect(),
        },
    );
}

fn chapter_ref(base: &str, number: u32) -> ChapterRef {
    ChapterRef {
        number,
        title: format!("Chapter {number}"),
        url: format!("{base}/ch-{number}"),
    }
}

#[tokio::test]
async fn partial_chapter_failure_still_completes_the_job() {
    let h = harness();
    script_novel(&h.extractor, NOVEL_URL, "Resilient Novel", &["Fantasy"]);
    h.extractor.script_chapter_list(
        NOVEL_URL,
        vec![
            chapter_ref(NOVEL_URL, 1),
            chapter_ref(NOVEL_URL, 2),
            chapter_ref(NOVEL_URL, 3),
        ],
    );
    // Chapter 2 is never scripted: its fetch fails.
    h.extractor
        .script_chapter_content(&format!("{NOVEL_URL}/ch-1"), "<p>one two three</p>");
    h.extractor
        .script_chapter_content(&format!("{NOVEL_URL}/ch-3"), "<p>four five</p>");

    let job = h.coordinator.create_job(NOVEL_URL).await.unwrap();
    let delivery = h.queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    h.executor.run_job(&delivery.job_id).await;

    let job = h.job_store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert!(job.error_message.is_none());

    let novels = h.storage.novels().await.unwrap();
    assert_eq!(novels.len(), 1);
    let chapters = h.storage.chapters(novels[0].id).await.unwrap();
    assert_eq!(chapters.len(), 2);
    let numbers: Vec<u32> = chapters.iter().map(|c| c.number).collect();
    assert_eq!(numbers, vec![1, 3]);

    // word_count reflects only the chapters that made it.
    assert_eq!(novels[0].word_count, 5);
    assert_eq!(
        novels[0].word_count,
        chapters.iter().map(|c| c.word_count).sum::<u64>()
    );
}

#[tokio::test]
async fn chapter_list_failure_fails_the_job_with_no_writes() {
    let h = harness();
    script_novel(&h.extractor, NOVEL_URL, "Doomed Novel", &[]);
    h.extractor.fail_chapter_list();

    let job = h.coordinator.create_job(NOVEL_URL).await.unwrap();
    let delivery = h.queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    h.executor.run_job(&delivery.job_id).await;

    let job = h.job_store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    let message = job.error_message.unwrap();
    assert!(message.contains("fetch chapter list"), "message: {message}");

    assert!(h.storage.novels().await.unwrap().is_empty());
    assert!(h.storage.genres().await.unwrap().is_empty());
}

#[tokio::test]
async fn metadata_failure_fails_the_job() {
    let h = harness();
    // Nothing scripted at all: metadata fetch fails first.
    let job = h.coordinator.create_job(NOVEL_URL).await.unwrap();
    let delivery = h.queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    h.executor.run_job(&delivery.job_id).await;

    let job = h.job_store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(
        job.error_message.unwrap().contains("fetch novel metadata"),
        "unexpected message"
    );
    assert!(h.storage.novels().await.unwrap().is_empty());
}

#[tokio::test]
async fn all_chapters_failing_fails_the_job() {
    let h = harness();
    script_novel(&h.extractor, NOVEL_URL, "Empty Novel", &[]);
    h.extractor
        .script_chapter_list(NOVEL_URL, vec![chapter_ref(NOVEL_URL, 1)]);
    // No chapter content scripted.

    let job = h.coordinator.create_job(NOVEL_URL).await.unwrap();
    let delivery = h.queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    h.executor.run_job(&delivery.job_id).await;

    let job = h.job_store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(h.storage.novels().await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_delivery_of_an_in_flight_job_is_a_no_op() {
    let h = harness();
    let job = h.coordinator.create_job(NOVEL_URL).await.unwrap();

    // Simulate the first delivery having already claimed the job.
    h.job_store
        .transition(&job.id, JobStatus::Queued, JobStatus::Crawling)
        .await
        .unwrap();

    h.executor.run_job(&job.id).await;

    let stored = h.job_store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Crawling);
    assert!(stored.error_message.is_none());
    assert!(h.storage.novels().await.unwrap().is_empty());
}

#[tokio::test]
async fn redelivery_of_a_done_job_changes_nothing() {
    let h = harness();
    script_novel(&h.extractor, NOVEL_URL, "Stable Novel", &["Action"]);
    h.extractor
        .script_chapter_list(NOVEL_URL, vec![chapter_ref(NOVEL_URL, 1)]);
    h.extractor
        .script_chapter_content(&format!("{NOVEL_URL}/ch-1"), "<p>words here now</p>");

    let job = h.coordinator.create_job(NOVEL_URL).await.unwrap();
    let delivery = h.queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    h.executor.run_job(&delivery.job_id).await;

    let after_first = h.job_store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(after_first.status, JobStatus::Done);

    // The queue redelivers the same id; the executor must bounce off.
    h.executor.run_job(&job.id).await;

    let after_second = h.job_store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(after_second.status, JobStatus::Done);
    assert_eq!(after_second.updated_at, after_first.updated_at);
    assert_eq!(h.storage.novels().await.unwrap().len(), 1);
}

#[tokio::test]
async fn genre_synonyms_from_two_novels_share_one_row() {
    let h = harness();
    let second_url = "https://example.com/novel/2";

    script_novel(&h.extractor, NOVEL_URL, "First Novel", &["Sci-Fi"]);
    h.extractor
        .script_chapter_list(NOVEL_URL, vec![chapter_ref(NOVEL_URL, 1)]);
    h.extractor
        .script_chapter_content(&format!("{NOVEL_URL}/ch-1"), "<p>alpha</p>");

    script_novel(&h.extractor, second_url, "Second Novel", &["Science Fiction"]);
    h.extractor
        .script_chapter_list(second_url, vec![chapter_ref(second_url, 1)]);
    h.extractor
        .script_chapter_content(&format!("{second_url}/ch-1"), "<p>beta</p>");

    for url in [NOVEL_URL, second_url] {
        h.coordinator.create_job(url).await.unwrap();
        let delivery = h.queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        h.executor.run_job(&delivery.job_id).await;
    }

    let genres = h.storage.genres().await.unwrap();
    assert_eq!(genres.len(), 1);
    assert_eq!(genres[0].slug, "science-fiction");

    let novels = h.storage.novels().await.unwrap();
    assert_eq!(novels.len(), 2);
    for novel in &novels {
        assert_eq!(novel.genres, vec!["science-fiction"]);
    }
}

#[tokio::test]
async fn reingesting_a_url_updates_the_novel_and_keeps_its_slug() {
    let h = harness();
    script_novel(&h.extractor, NOVEL_URL, "Original Title", &[]);
    h.extractor
        .script_chapter_list(NOVEL_URL, vec![chapter_ref(NOVEL_URL, 1)]);
    h.extractor
        .script_chapter_content(&format!("{NOVEL_URL}/ch-1"), "<p>one</p>");

    let first_job = h.coordinator.create_job(NOVEL_URL).await.unwrap();
    let delivery = h.queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    h.executor.run_job(&delivery.job_id).await;

    // The source retitles the novel and grows a chapter.
    script_novel(&h.extractor, NOVEL_URL, "Renamed Title", &[]);
    h.extractor.script_chapter_list(
        NOVEL_URL,
        vec![chapter_ref(NOVEL_URL, 1), chapter_ref(NOVEL_URL, 2)],
    );
    h.extractor
        .script_chapter_content(&format!("{NOVEL_URL}/ch-2"), "<p>two words</p>");

    let second_job = h.coordinator.create_job(NOVEL_URL).await.unwrap();
    assert_ne!(first_job.id, second_job.id);
    let delivery = h.queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    h.executor.run_job(&delivery.job_id).await;

    let novels = h.storage.novels().await.unwrap();
    assert_eq!(novels.len(), 1);
    assert_eq!(novels[0].title, "Renamed Title");
    assert_eq!(novels[0].slug, "original-title");
    assert_eq!(novels[0].id, NovelId(1));
    assert_eq!(h.storage.chapters(novels[0].id).await.unwrap().len(), 2);

    let first = h.job_store.get(&first_job.id).await.unwrap().unwrap();
    let second = h.job_store.get(&second_job.id).await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Done);
    assert_eq!(second.status, JobStatus::Done);
}

#[tokio::test]
async fn worker_loop_drains_the_queue_and_stops_on_shutdown() {
    let h = harness();
    script_novel(&h.extractor, NOVEL_URL, "Looped Novel", &[]);
    h.extractor
        .script_chapter_list(NOVEL_URL, vec![chapter_ref(NOVEL_URL, 1)]);
    h.extractor
        .script_chapter_content(&format!("{NOVEL_URL}/ch-1"), "<p>loop loop</p>");

    let job = h.coordinator.create_job(NOVEL_URL).await.unwrap();

    let worker = Worker::new(
        Arc::clone(&h.queue) as Arc<dyn WorkQueue>,
        Arc::clone(&h.job_store) as Arc<dyn JobStore>,
        Arc::clone(&h.executor),
        Duration::from_secs(30),
        Duration::from_millis(20),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stored = h.job_store.get(&job.id).await.unwrap().unwrap();
        if stored.status.is_terminal() {
            assert_eq!(stored.status, JobStatus::Done);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "worker never finished the job"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn slow_extraction_times_out_and_marks_the_job_failed() {
    let h = harness();
    script_novel(&h.extractor, NOVEL_URL, "Stuck Novel", &[]);
    h.extractor.script_delay(Duration::from_secs(60));

    let job = h.coordinator.create_job(NOVEL_URL).await.unwrap();

    let worker = Worker::new(
        Arc::clone(&h.queue) as Arc<dyn WorkQueue>,
        Arc::clone(&h.job_store) as Arc<dyn JobStore>,
        Arc::clone(&h.executor),
        Duration::from_millis(50),
        Duration::from_millis(20),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stored = h.job_store.get(&job.id).await.unwrap().unwrap();
        if stored.status.is_terminal() {
            assert_eq!(stored.status, JobStatus::Error);
            assert!(stored.error_message.unwrap().contains("timed out"));
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job never reached a terminal state"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
