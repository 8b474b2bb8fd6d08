//! Scripted collaborators for tests: an extractor that replays canned
//! results instead of touching the network.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::ExtractionError;
use crate::extractor::{ChapterRef, Extractor, NovelMetadata};

/// Extractor that serves pre-scripted responses keyed by URL.
///
/// Unscripted chapter URLs fail, which is how tests simulate partial
/// chapter failures and dead sites.
#[derive(Debug, Default)]
pub struct ScriptedExtractor {
    metadata: Mutex<HashMap<String, NovelMetadata>>,
    chapter_lists: Mutex<HashMap<String, Vec<ChapterRef>>>,
    chapter_contents: Mutex<HashMap<String, String>>,
    fail_chapter_list: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_metadata(&self, url: &str, metadata: NovelMetadata) {
        self.metadata
            .lock()
            .expect("scripted extractor mutex poisoned")
            .insert(url.to_string(), metadata);
    }

    pub fn script_chapter_list(&self, url: &str, chapters: Vec<ChapterRef>) {
        self.chapter_lists
            .lock()
            .expect("scripted extractor mutex poisoned")
            .insert(url.to_string(), chapters);
    }

    pub fn script_chapter_content(&self, url: &str, html: &str) {
        self.chapter_contents
            .lock()
            .expect("scripted extractor mutex poisoned")
            .insert(url.to_string(), html.to_string());
    }

    /// Make every chapter-list fetch fail, simulating a source whose
    /// table of contents cannot be read at all.
    pub fn fail_chapter_list(&self) {
        *self
            .fail_chapter_list
            .lock()
            .expect("scripted extractor mutex poisoned") = true;
    }

    /// Delay every metadata fetch, simulating a slow or hung site.
    pub fn script_delay(&self, delay: Duration) {
        *self.delay.lock().expect("scripted extractor mutex poisoned") = Some(delay);
    }

    fn configured_delay(&self) -> Option<Duration> {
        *self.delay.lock().expect("scripted extractor mutex poisoned")
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn fetch_novel_metadata(&self, url: &Url) -> Result<NovelMetadata, ExtractionError> {
        if let Some(delay) = self.configured_delay() {
            tokio::time::sleep(delay).await;
        }
        self.metadata
            .lock()
            .expect("scripted extractor mutex poisoned")
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| ExtractionError::new(format!("no scripted metadata for {url}")))
    }

    async fn fetch_chapter_list(&self, url: &Url) -> Result<Vec<ChapterRef>, ExtractionError> {
        if *self
            .fail_chapter_list
            .lock()
            .expect("scripted extractor mutex poisoned")
        {
            return Err(ExtractionError::new(format!(
                "scripted chapter list failure for {url}"
            )));
        }
        self.chapter_lists
            .lock()
            .expect("scripted extractor mutex poisoned")
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| ExtractionError::new(format!("no scripted chapter list for {url}")))
    }

    async fn fetch_chapter_content(&self, url: &Url) -> Result<String, ExtractionError> {
        self.chapter_contents
            .lock()
            .expect("scripted extractor mutex poisoned")
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| ExtractionError::new(format!("no scripted content for {url}")))
    }
}
