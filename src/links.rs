use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::BookError;
use crate::html::{anchor_text, resolve_href};
use crate::model::{normalize_url, title_from_url, ChapterLink};

/// Selectors associated with chapter listings, highest priority first.
const CHAPTER_SELECTORS: &[&str] = &[
    r#"a[href*="chapter"]"#,
    r#"a[href*="ch-"]"#,
    r#"a[href*="/ch/"]"#,
    "a.chapter-link",
    ".chapter-link a",
    r#"a[class*="chapter"]"#,
    ".chapter a",
    r#"[id*="chapter"] a"#,
    ".toc a",
    "#toc a",
    ".table-of-contents a",
];

/// Words in anchor text that mark a chapter when no selector matched.
const CHAPTER_WORDS: &[&str] = &["chapter", "ch.", "part"];

static COMPILED_SELECTORS: LazyLock<Vec<(&'static str, Selector)>> = LazyLock::new(|| {
    CHAPTER_SELECTORS
        .iter()
        .map(|css| (*css, Selector::parse(css).unwrap()))
        .collect()
});

static ANY_ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// A discovery strategy: listing page in, candidate links (document order,
/// possibly repeated) out.
type Strategy = fn(&Html, &Url) -> Vec<ChapterLink>;

/// Tried in order; the first one returning anything wins outright.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("selector", by_selector),
    ("text-heuristic", by_anchor_text),
];

/// Discover chapter links on a listing page.
pub fn extract_links(doc: &Html, base: &Url) -> Result<Vec<ChapterLink>, BookError> {
    for (name, strategy) in STRATEGIES {
        let candidates = strategy(doc, base);
        if candidates.is_empty() {
            debug!("strategy {} found nothing", name);
            continue;
        }
        let links = dedup(candidates);
        debug!("strategy {} found {} chapters", name, links.len());
        return Ok(links);
    }
    Err(BookError::NoChaptersFound {
        url: base.to_string(),
    })
}

/// Parse and run [`extract_links`] in one go.
pub fn extract_links_from_html(html: &str, base: &Url) -> Result<Vec<ChapterLink>, BookError> {
    let doc = Html::parse_document(html);
    extract_links(&doc, base)
}

/// Strategy 1: the first selector with any usable anchor supplies every
/// candidate; matches of later selectors are never mixed in.
fn by_selector(doc: &Html, base: &Url) -> Vec<ChapterLink> {
    for (css, selector) in COMPILED_SELECTORS.iter() {
        let found: Vec<ChapterLink> = doc
            .select(selector)
            .filter_map(|a| candidate(a, base))
            .collect();
        if !found.is_empty() {
            debug!("selector {:?} matched {} anchors", css, found.len());
            return found;
        }
    }
    Vec::new()
}

/// Strategy 2: any anchor whose text mentions a chapter word.
fn by_anchor_text(doc: &Html, base: &Url) -> Vec<ChapterLink> {
    doc.select(&ANY_ANCHOR)
        .filter(|a| {
            let text = anchor_text(*a).to_lowercase();
            CHAPTER_WORDS.iter().any(|w| text.contains(w))
        })
        .filter_map(|a| candidate(a, base))
        .collect()
}

/// Turn an anchor into a link, or `None` when it has no usable target or
/// points back at the listing page.
fn candidate(anchor: ElementRef, base: &Url) -> Option<ChapterLink> {
    let href = anchor.value().attr("href")?;
    let url = resolve_href(base, href)?;
    if normalize_url(&url) == normalize_url(base) {
        return None;
    }
    let text = anchor_text(anchor);
    let title = if text.is_empty() {
        title_from_url(&url).unwrap_or_else(|| url.to_string())
    } else {
        text
    };
    Some(ChapterLink::new(title, url))
}

/// Keep the first occurrence of each normalized URL.
fn dedup(candidates: Vec<ChapterLink>) -> Vec<ChapterLink> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|link| seen.insert(link.key()))
        .collect()
}

// ── Tests ──
