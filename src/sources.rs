use std::collections::HashMap;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::IngestError;

/// CSS selectors describing how to pull novel data out of one site's pages.
///
/// Extraction rules are data, not code: adding a site means adding a catalog
/// entry, not writing a new extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSelectors {
    pub title: String,
    pub synopsis: String,
    pub status: String,
    pub genres: String,
    pub chapter_links: String,
    pub chapter_title: String,
    pub chapter_content: String,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            title: "h1".to_string(),
            synopsis: ".synopsis".to_string(),
            status: ".status".to_string(),
            genres: ".genres a".to_string(),
            chapter_links: ".chapter-list a".to_string(),
            chapter_title: "h1".to_string(),
            chapter_content: ".chapter-content".to_string(),
        }
    }
}

/// One supported site: the extractor name, the exact domains it serves,
/// and its selector rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRule {
    pub extractor: String,
    pub domains: Vec<String>,
    #[serde(default)]
    pub selectors: SiteSelectors,
}

/// Immutable set of supported sources, loaded once at startup and passed
/// into the router and extractor registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCatalog {
    pub sources: Vec<SourceRule>,
}

impl SourceCatalog {
    pub fn builtin() -> Self {
        Self {
            sources: vec![
                SourceRule {
                    extractor: "pixiv".to_string(),
                    domains: vec!["pixiv.net".to_string()],
                    selectors: SiteSelectors {
                        title: "h1.work-title".to_string(),
                        synopsis: "div.work-caption".to_string(),
                        status: "span.series-status".to_string(),
                        genres: "ul.work-tags a".to_string(),
                        chapter_links: "ul.series-contents a".to_string(),
                        chapter_title: "h1.episode-title".to_string(),
                        chapter_content: "div.episode-body".to_string(),
                    },
                },
                SourceRule {
                    extractor: "royalroad".to_string(),
                    domains: vec!["royalroad.com".to_string()],
                    selectors: SiteSelectors {
                        title: "div.fic-title h1".to_string(),
                        synopsis: "div.description".to_string(),
                        status: "span.label-sm".to_string(),
                        genres: "span.tags a".to_string(),
                        chapter_links: "table#chapters td:first-child a".to_string(),
                        chapter_title: "div.fic-header h1".to_string(),
                        chapter_content: "div.chapter-inner".to_string(),
                    },
                },
                SourceRule {
                    extractor: "example_site".to_string(),
                    domains: vec!["example.com".to_string()],
                    selectors: SiteSelectors::default(),
                },
            ],
        }
    }

    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read source catalog: {}", path.display()))?;
        let catalog: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse source catalog: {}", path.display()))?;
        if catalog.sources.is_empty() {
            anyhow::bail!("source catalog has no sources: {}", path.display());
        }
        Ok(catalog)
    }
}

/// Maps a source URL to the extractor responsible for it.
///
/// Lookup is by exact lowercased host; each registered domain also answers
/// for its `www.` variant (and a `www.` domain for its bare form). No
/// wildcard or fuzzy matching.
#[derive(Debug, Clone)]
pub struct SourceRouter {
    by_domain: HashMap<String, String>,
}

impl SourceRouter {
    pub fn new(catalog: &SourceCatalog) -> Self {
        let mut by_domain = HashMap::new();
        for rule in &catalog.sources {
            for domain in &rule.domains {
                let domain = domain.trim().to_ascii_lowercase();
                if domain.is_empty() {
                    continue;
                }
                let sibling = match domain.strip_prefix("www.") {
                    Some(bare) => bare.to_string(),
                    None => format!("www.{domain}"),
                };
                by_domain.insert(domain, rule.extractor.clone());
                by_domain.insert(sibling, rule.extractor.clone());
            }
        }
        Self { by_domain }
    }

    pub fn resolve(&self, url: &Url) -> Result<&str, IngestError> {
        let domain = url.host_str().unwrap_or_default().to_ascii_lowercase();
        match self.by_domain.get(&domain) {
            Some(extractor) => Ok(extractor),
            None => Err(IngestError::UnsupportedSource { domain }),
        }
    }

    /// Parse and route in one step; used by the coordinator so unsupported
    /// URLs are rejected before any job row exists.
    pub fn resolve_str(&self, url: &str) -> Result<(Url, String), IngestError> {
        let parsed = Url::parse(url).map_err(|source| IngestError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let extractor = self.resolve(&parsed)?.to_string();
        Ok((parsed, extractor))
    }

    pub fn is_supported(&self, url: &str) -> bool {
        self.resolve_str(url).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> SourceRouter {
        SourceRouter::new(&SourceCatalog::builtin())
    }

    #[test]
    fn resolves_registered_domains() {
        let url = Url::parse("https://royalroad.com/fiction/1234/some-novel").unwrap();
        assert_eq!(router().resolve(&url).unwrap(), "royalroad");
    }

    #[test]
    fn resolves_www_variant_of_bare_domain() {
        let url = Url::parse("https://www.pixiv.net/novel/show.php?id=1").unwrap();
        assert_eq!(router().resolve(&url).unwrap(), "pixiv");
    }

    #[test]
    fn rejects_unregistered_domain() {
        let err = router().resolve_str("https://badsite.invalid/novel/1").unwrap_err();
        match err {
            IngestError::UnsupportedSource { domain } => assert_eq!(domain, "badsite.invalid"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_unparseable_url() {
        let err = router().resolve_str("not a url").unwrap_err();
        assert!(matches!(err, IngestError::InvalidUrl { .. }));
    }

    #[test]
    fn host_matching_is_exact_not_suffix() {
        // A subdomain other than www. must not inherit the parent's extractor.
        assert!(!router().is_supported("https://forum.royalroad.com/thread/9"));
        assert!(!router().is_supported("https://notroyalroad.com/fiction/1"));
    }
}
