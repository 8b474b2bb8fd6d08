use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

use crate::normalize::GenreLexicon;
use crate::sources::SourceCatalog;

/// Process configuration, read once from the environment.
///
/// The source catalog and genre lexicon are loaded through here as well so
/// every binary wires the same immutable tables into the router, registry
/// and normalizer.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root for the job store, queue and catalog files.
    pub data_dir: PathBuf,
    /// Hard bound on one job's execution; a job past it is marked `error`.
    pub job_timeout: Duration,
    /// How long one dequeue call blocks before the worker loops around.
    pub dequeue_wait: Duration,
    /// Queue scan interval while a dequeue call is waiting.
    pub poll_interval: Duration,
    /// Age at which an unacked queue claim becomes deliverable again.
    pub visibility_timeout: Duration,
    /// Per-request bound on extractor page fetches.
    pub fetch_timeout: Duration,
    pub sources_file: Option<PathBuf>,
    pub genres_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("workspace-data"),
            job_timeout: Duration::from_secs(3600),
            dequeue_wait: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
            visibility_timeout: Duration::from_secs(7200),
            fetch_timeout: Duration::from_secs(30),
            sources_file: None,
            genres_file: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(dir) = env_string("NOVELPRESS_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config.job_timeout =
            env_duration_secs("NOVELPRESS_JOB_TIMEOUT_SECS", config.job_timeout)?;
        config.dequeue_wait =
            env_duration_secs("NOVELPRESS_DEQUEUE_WAIT_SECS", config.dequeue_wait)?;
        config.poll_interval =
            env_duration_millis("NOVELPRESS_POLL_INTERVAL_MS", config.poll_interval)?;
        config.visibility_timeout = env_duration_secs(
            "NOVELPRESS_VISIBILITY_TIMEOUT_SECS",
            config.visibility_timeout,
        )?;
        config.fetch_timeout =
            env_duration_secs("NOVELPRESS_FETCH_TIMEOUT_SECS", config.fetch_timeout)?;
        config.sources_file = env_string("NOVELPRESS_SOURCES_FILE").map(PathBuf::from);
        config.genres_file = env_string("NOVELPRESS_GENRES_FILE").map(PathBuf::from);

        if config.job_timeout.is_zero() {
            anyhow::bail!("NOVELPRESS_JOB_TIMEOUT_SECS must be positive");
        }
        if config.poll_interval.is_zero() {
            anyhow::bail!("NOVELPRESS_POLL_INTERVAL_MS must be positive");
        }
        Ok(config)
    }

    pub fn load_catalog(&self) -> anyhow::Result<SourceCatalog> {
        match &self.sources_file {
            Some(path) => SourceCatalog::from_yaml_file(path),
            None => Ok(SourceCatalog::builtin()),
        }
    }

    pub fn load_lexicon(&self) -> anyhow::Result<GenreLexicon> {
        match &self.genres_file {
            Some(path) => GenreLexicon::from_yaml_file(path),
            None => Ok(GenreLexicon::builtin()),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_duration_secs(key: &str, default: Duration) -> anyhow::Result<Duration> {
    match env_string(key) {
        Some(raw) => {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("invalid {key}={raw:?}: expected seconds"))?;
            Ok(Duration::from_secs(secs))
        }
        None => Ok(default),
    }
}

fn env_duration_millis(key: &str, default: Duration) -> anyhow::Result<Duration> {
    match env_string(key) {
        Some(raw) => {
            let millis: u64 = raw
                .parse()
                .with_context(|| format!("invalid {key}={raw:?}: expected milliseconds"))?;
            Ok(Duration::from_millis(millis))
        }
        None => Ok(default),
    }
}
