use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::Context as _;
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};

use crate::app::model::{ChapterRecord, NovelDraft};

/// Tags that survive sanitization. Everything else is unwrapped (tag
/// removed, text kept) unless it is dropped outright.
const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "em", "strong", "b", "i", "u", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
    "ol", "ul", "li", "hr", "span", "div",
];

/// Tags removed together with their content.
const DROPPED_TAGS: &[&str] = &["script", "style", "iframe", "noscript"];

const VOID_TAGS: &[&str] = &["br", "hr"];

/// Class/id fragments that mark scraped boilerplate rather than prose.
const JUNK_PATTERN: &str = concat!(
    r"ad[s]?[-_]|advertisement|banner|sidebar|navigation|nav[-_]|menu|",
    r"footer|header|social|share|comment|popup|modal|related",
);

/// Cleans raw chapter markup into the canonical stored form.
///
/// Keeps only the allow-listed tags and the `class` attribute, drops ads,
/// scripts and navigation junk, and normalizes whitespace. Sanitizing
/// already-sanitized content yields the same content.
#[derive(Debug)]
pub struct Sanitizer {
    junk: Regex,
    empty_blocks: Regex,
    excess_newlines: Regex,
    excess_spaces: Regex,
}

impl Sanitizer {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            junk: Regex::new(&format!("(?i){JUNK_PATTERN}")).context("compile junk pattern")?,
            empty_blocks: Regex::new(r"<p>\s*</p>|<div>\s*</div>")
                .context("compile empty block pattern")?,
            excess_newlines: Regex::new(r"\n{3,}").context("compile newline pattern")?,
            excess_spaces: Regex::new(r" {2,}").context("compile space pattern")?,
        })
    }

    pub fn sanitize(&self, html: &str) -> String {
        if html.trim().is_empty() {
            return String::new();
        }

        let fragment = Html::parse_fragment(html);
        let mut out = String::with_capacity(html.len());
        self.emit_children(fragment.root_element(), &mut out);
        self.normalize_whitespace(&out)
    }

    /// Plain text of the markup, tags stripped, segments joined by spaces.
    pub fn extract_text(&self, html: &str) -> String {
        let fragment = Html::parse_fragment(html);
        let chunks: Vec<&str> = fragment
            .root_element()
            .text()
            .map(str::trim)
            .filter(|chunk| !chunk.is_empty())
            .collect();
        chunks.join(" ")
    }

    /// Whitespace-delimited token count of the tag-stripped text.
    pub fn count_words(&self, html: &str) -> u64 {
        self.extract_text(html).split_whitespace().count() as u64
    }

    fn emit_children(&self, element: ElementRef<'_>, out: &mut String) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => escape_text(&text.text, out),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.emit_element(child_el, out);
                    }
                }
                _ => {}
            }
        }
    }

    fn emit_element(&self, element: ElementRef<'_>, out: &mut String) {
        let name = element.value().name();
        if DROPPED_TAGS.contains(&name) || self.has_junk_marker(element) {
            return;
        }
        if !ALLOWED_TAGS.contains(&name) {
            // Disallowed but harmless: keep the text, lose the tag.
            self.emit_children(element, out);
            return;
        }

        out.push('<');
        out.push_str(name);
        if let Some(class) = element.value().attr("class") {
            out.push_str(" class=\"");
            escape_attr(class, out);
            out.push('"');
        }
        out.push('>');

        if VOID_TAGS.contains(&name) {
            return;
        }
        self.emit_children(element, out);
        out.push_str("</");
        out.push_str(name);
        out.push('>');
    }

    fn has_junk_marker(&self, element: ElementRef<'_>) -> bool {
        let value = element.value();
        value.attr("class").is_some_and(|class| self.junk.is_match(class))
            || value.attr("id").is_some_and(|id| self.junk.is_match(id))
    }

    fn normalize_whitespace(&self, html: &str) -> String {
        // Empty blocks go first so the gaps they leave are collapsed below.
        let html = self.empty_blocks.replace_all(html, "");
        let html = self.excess_newlines.replace_all(&html, "\n\n");
        let html = self.excess_spaces.replace_all(&html, " ");
        html.trim().to_string()
    }
}

fn escape_text(input: &str, out: &mut String) {
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attr(input: &str, out: &mut String) {
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

/// Curated synonym table mapping raw genre labels to canonical slugs.
///
/// Unmapped labels fall back to the deterministic slug of the label itself,
/// so an unknown genre never fails ingestion; it just stays unmerged until
/// a synonym is added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenreLexicon {
    synonyms: HashMap<String, String>,
}

impl GenreLexicon {
    pub fn builtin() -> Self {
        let pairs: &[(&str, &str)] = &[
            ("fantasy", "fantasy"),
            ("high fantasy", "high-fantasy"),
            ("urban fantasy", "urban-fantasy"),
            ("dark fantasy", "dark-fantasy"),
            ("xianxia", "xianxia"),
            ("xuanhuan", "xuanhuan"),
            ("wuxia", "wuxia"),
            ("cultivation", "cultivation"),
            ("action", "action"),
            ("adventure", "adventure"),
            ("romance", "romance"),
            ("mystery", "mystery"),
            ("horror", "horror"),
            ("thriller", "thriller"),
            ("sci-fi", "science-fiction"),
            ("science fiction", "science-fiction"),
            ("scifi", "science-fiction"),
            ("drama", "drama"),
            ("comedy", "comedy"),
            ("slice of life", "slice-of-life"),
            ("psychological", "psychological"),
            ("supernatural", "supernatural"),
            ("martial arts", "martial-arts"),
            ("historical", "historical"),
            ("tragedy", "tragedy"),
            ("seinen", "seinen"),
            ("shounen", "shounen"),
            ("isekai", "isekai"),
            ("litrpg", "litrpg"),
            ("progression", "progression"),
            ("system", "system"),
        ];
        Self::with_synonyms(
            pairs
                .iter()
                .map(|(raw, slug)| (raw.to_string(), slug.to_string()))
                .collect(),
        )
    }

    pub fn with_synonyms(synonyms: HashMap<String, String>) -> Self {
        let synonyms = synonyms
            .into_iter()
            .map(|(raw, slug)| (raw.trim().to_lowercase(), slug))
            .collect();
        Self { synonyms }
    }

    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read genre lexicon: {}", path.display()))?;
        let lexicon: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse genre lexicon: {}", path.display()))?;
        Ok(Self::with_synonyms(lexicon.synonyms))
    }

    /// Canonical slug for one raw label, or `None` for labels that produce
    /// no usable slug (empty, too short, too long).
    pub fn canonicalize(&self, raw: &str) -> Option<String> {
        let clean = raw.trim().to_lowercase();
        if clean.is_empty() {
            return None;
        }
        if let Some(slug) = self.synonyms.get(&clean) {
            return Some(slug.clone());
        }
        let slug = slugify(&clean);
        if (2..=50).contains(&slug.chars().count()) {
            Some(slug)
        } else {
            None
        }
    }

    /// Canonicalize a batch of labels: deduplicated, sorted, stable.
    pub fn canonicalize_all(&self, raw: &[String]) -> Vec<String> {
        let slugs: BTreeSet<String> = raw
            .iter()
            .filter_map(|label| self.canonicalize(label))
            .collect();
        slugs.into_iter().collect()
    }
}

/// Lowercase, collapse non-alphanumeric runs to single hyphens, trim.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_hyphen = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            pending_hyphen = true;
        }
    }
    out
}

/// Resolve a slug collision by appending the first free numeric suffix.
pub fn disambiguate(base: &str, mut is_taken: impl FnMut(&str) -> bool) -> String {
    if !is_taken(base) {
        return base.to_string();
    }
    let mut suffix = 2u64;
    loop {
        let candidate = format!("{base}-{suffix}");
        if !is_taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Display name for a genre slug: `slice-of-life` -> `Slice Of Life`.
pub fn genre_display_name(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Raw extractor output for a whole novel, before normalization.
#[derive(Debug, Clone)]
pub struct RawNovel {
    pub source_url: String,
    pub title: String,
    pub synopsis: String,
    pub status: String,
    pub genres: Vec<String>,
    pub chapters: Vec<RawChapter>,
}

#[derive(Debug, Clone)]
pub struct RawChapter {
    pub number: u32,
    pub title: String,
    pub html: String,
    pub source_url: String,
}

/// Pure normalization pass: sanitize every chapter, compute word counts,
/// canonicalize genres, derive the base slug. No I/O.
pub fn normalize_novel(sanitizer: &Sanitizer, lexicon: &GenreLexicon, raw: &RawNovel) -> NovelDraft {
    let mut chapters: Vec<ChapterRecord> = Vec::with_capacity(raw.chapters.len());
    let mut seen_numbers = BTreeSet::new();
    let mut total_words = 0u64;

    for chapter in &raw.chapters {
        if !seen_numbers.insert(chapter.number) {
            tracing::warn!(
                number = chapter.number,
                url = %chapter.source_url,
                "duplicate chapter number from source; keeping first"
            );
            continue;
        }
        let content = sanitizer.sanitize(&chapter.html);
        let word_count = sanitizer.count_words(&content);
        total_words += word_count;

        let title = chapter.title.trim();
        chapters.push(ChapterRecord {
            number: chapter.number,
            title: if title.is_empty() {
                format!("Chapter {}", chapter.number)
            } else {
                title.to_string()
            },
            content,
            word_count,
            source_url: chapter.source_url.clone(),
        });
    }
    chapters.sort_by_key(|chapter| chapter.number);

    let title = raw.title.trim().to_string();
    let status = raw.status.trim().to_lowercase();

    NovelDraft {
        source_url: raw.source_url.clone(),
        slug: slugify(&title),
        title,
        synopsis: raw.synopsis.trim().to_string(),
        status: if status.is_empty() {
            "unknown".to_string()
        } else {
            status
        },
        word_count: total_words,
        genres: lexicon.canonicalize_all(&raw.genres),
        chapters,
    }
}
