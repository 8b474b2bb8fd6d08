use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use scraper::{Html, Selector};
use url::Url;

use crate::error::ExtractionError;
use crate::sources::{SiteSelectors, SourceCatalog};

/// Novel-level metadata scraped from a source's main page.
#[derive(Debug, Clone)]
pub struct NovelMetadata {
    pub title: String,
    pub synopsis: String,
    pub status: String,
    pub raw_genres: Vec<String>,
}

/// One entry of a source's chapter list.
#[derive(Debug, Clone)]
pub struct ChapterRef {
    pub number: u32,
    pub title: String,
    pub url: String,
}

/// Site-specific extraction capability.
///
/// Each call may fail independently: the executor fails the job on
/// metadata or chapter-list errors, but records and skips individual
/// chapter-content failures.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn fetch_novel_metadata(&self, url: &Url) -> Result<NovelMetadata, ExtractionError>;
    async fn fetch_chapter_list(&self, url: &Url) -> Result<Vec<ChapterRef>, ExtractionError>;
    async fn fetch_chapter_content(&self, url: &Url) -> Result<String, ExtractionError>;
}

/// Closed name -> extractor table, built once at startup.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    by_name: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, extractor: Arc<dyn Extractor>) {
        self.by_name.insert(name.into(), extractor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Extractor>> {
        self.by_name.get(name).cloned()
    }

    /// One selector-driven extractor per catalog source.
    pub fn from_catalog(catalog: &SourceCatalog, fetch_timeout: Duration) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        for rule in &catalog.sources {
            let extractor = SelectorExtractor::new(&rule.selectors, fetch_timeout)
                .with_context(|| format!("build extractor: {}", rule.extractor))?;
            registry.register(rule.extractor.clone(), Arc::new(extractor));
        }
        Ok(registry)
    }
}

struct CompiledSelectors {
    title: Selector,
    synopsis: Selector,
    status: Selector,
    genres: Selector,
    chapter_links: Selector,
    chapter_title: Selector,
    chapter_content: Selector,
}

fn compile(raw: &str) -> anyhow::Result<Selector> {
    Selector::parse(raw).map_err(|err| anyhow::anyhow!("parse selector {raw:?}: {err:?}"))
}

/// Generic extractor driven by per-site CSS selector rules.
///
/// Chapter numbers follow the declared order of the source's chapter list
/// when the site does not expose explicit numbering.
pub struct SelectorExtractor {
    client: reqwest::Client,
    selectors: CompiledSelectors,
}

impl SelectorExtractor {
    pub fn new(selectors: &SiteSelectors, fetch_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build extractor http client")?;
        Ok(Self {
            client,
            selectors: CompiledSelectors {
                title: compile(&selectors.title)?,
                synopsis: compile(&selectors.synopsis)?,
                status: compile(&selectors.status)?,
                genres: compile(&selectors.genres)?,
                chapter_links: compile(&selectors.chapter_links)?,
                chapter_title: compile(&selectors.chapter_title)?,
                chapter_content: compile(&selectors.chapter_content)?,
            },
        })
    }

    async fn fetch_page(&self, url: &Url) -> Result<String, ExtractionError> {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, "novelpress/0.1")
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|err| ExtractionError::new(format!("GET {url}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::new(format!("GET {url} returned {status}")));
        }
        response
            .text()
            .await
            .map_err(|err| ExtractionError::new(format!("read body of {url}: {err}")))
    }

    fn parse_metadata(&self, html: &str, url: &Url) -> Result<NovelMetadata, ExtractionError> {
        let document = Html::parse_document(html);

        let title = select_text(&document, &self.selectors.title).ok_or_else(|| {
            ExtractionError::new(format!("no title matched on novel page: {url}"))
        })?;
        let synopsis = select_text(&document, &self.selectors.synopsis).unwrap_or_default();
        let status = select_text(&document, &self.selectors.status).unwrap_or_default();
        let raw_genres = document
            .select(&self.selectors.genres)
            .map(element_text)
            .filter(|genre| !genre.is_empty())
            .collect();

        Ok(NovelMetadata {
            title,
            synopsis,
            status,
            raw_genres,
        })
    }

    fn parse_chapter_list(&self, html: &str, url: &Url) -> Vec<ChapterRef> {
        let document = Html::parse_document(html);
        let mut chapters = Vec::new();

        for anchor in document.select(&self.selectors.chapter_links) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Ok(chapter_url) = url.join(href) else {
                tracing::debug!(href, "skipping unparseable chapter link");
                continue;
            };
            let number = chapters.len() as u32 + 1;
            let title = element_text(anchor);
            chapters.push(ChapterRef {
                number,
                title: if title.is_empty() {
                    format!("Chapter {number}")
                } else {
                    title
                },
                url: chapter_url.to_string(),
            });
        }
        chapters
    }

    fn parse_chapter_content(&self, html: &str, url: &Url) -> Result<String, ExtractionError> {
        let document = Html::parse_document(html);
        document
            .select(&self.selectors.chapter_content)
            .next()
            .map(|content| content.inner_html())
            .ok_or_else(|| {
                ExtractionError::new(format!("no content matched on chapter page: {url}"))
            })
    }
}

#[async_trait]
impl Extractor for SelectorExtractor {
    async fn fetch_novel_metadata(&self, url: &Url) -> Result<NovelMetadata, ExtractionError> {
        let html = self.fetch_page(url).await?;
        self.parse_metadata(&html, url)
    }

    async fn fetch_chapter_list(&self, url: &Url) -> Result<Vec<ChapterRef>, ExtractionError> {
        let html = self.fetch_page(url).await?;
        Ok(self.parse_chapter_list(&html, url))
    }

    async fn fetch_chapter_content(&self, url: &Url) -> Result<String, ExtractionError> {
        let html = self.fetch_page(url).await?;
        self.parse_chapter_content(&html, url)
    }
}

fn select_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(element_text)
        .find(|text| !text.is_empty())
}

fn element_text(element: scraper::ElementRef<'_>) -> String {
    let chunks: Vec<&str> = element
        .text()
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .collect();
    chunks.join(" ")
}
