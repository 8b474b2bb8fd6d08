use std::sync::Arc;

use anyhow::Context as _;

use crate::app::coordinator::QueueCoordinator;
use crate::app::executor::CrawlExecutor;
use crate::app::job_store::{JobStore, LocalFsJobStore};
use crate::app::queue::{LocalFsWorkQueue, WorkQueue};
use crate::app::storage::{LocalFsStorageGateway, StorageGateway};
use crate::config::AppConfig;
use crate::extractor::ExtractorRegistry;
use crate::normalize::Sanitizer;
use crate::sources::SourceRouter;

pub mod coordinator;
pub mod executor;
mod fsjson;
pub mod job_store;
pub mod model;
pub mod queue;
pub mod storage;
pub mod worker;

/// Fully wired ingestion engine over the local filesystem backends.
///
/// Both binaries assemble one of these; tests wire the in-memory backends
/// by hand instead.
pub struct Engine {
    pub config: AppConfig,
    pub job_store: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub storage: Arc<dyn StorageGateway>,
    pub coordinator: Arc<QueueCoordinator>,
    pub executor: Arc<CrawlExecutor>,
}

pub fn build_engine(config: AppConfig) -> anyhow::Result<Engine> {
    let catalog = config.load_catalog().context("load source catalog")?;
    let lexicon = config.load_lexicon().context("load genre lexicon")?;
    let router = SourceRouter::new(&catalog);
    let registry = ExtractorRegistry::from_catalog(&catalog, config.fetch_timeout)
        .context("build extractor registry")?;
    let sanitizer = Sanitizer::new().context("build sanitizer")?;

    let job_store: Arc<dyn JobStore> = Arc::new(LocalFsJobStore::new(&config.data_dir));
    let queue: Arc<dyn WorkQueue> = Arc::new(LocalFsWorkQueue::new(
        &config.data_dir,
        config.poll_interval,
        config.visibility_timeout,
    ));
    let storage: Arc<dyn StorageGateway> = Arc::new(LocalFsStorageGateway::new(&config.data_dir));

    let coordinator = Arc::new(QueueCoordinator::new(
        router.clone(),
        Arc::clone(&job_store),
        Arc::clone(&queue),
    ));
    let executor = Arc::new(CrawlExecutor::new(
        router,
        registry,
        sanitizer,
        lexicon,
        Arc::clone(&job_store),
        Arc::clone(&storage),
    ));

    Ok(Engine {
        config,
        job_store,
        queue,
        storage,
        coordinator,
        executor,
    })
}
