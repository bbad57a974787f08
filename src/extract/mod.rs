pub mod convert;
pub mod readability;

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::BookError;
use crate::html::{collapse_ws, is_discarded, visible_text};
use crate::model::ExtractedDocument;

static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static H2: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("head title, title").unwrap());

/// Default minimum of visible characters in the content root.
pub const DEFAULT_MIN_CONTENT_CHARS: usize = 250;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Roots with less visible text than this fail as too thin.
    pub min_content_chars: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            min_content_chars: DEFAULT_MIN_CONTENT_CHARS,
        }
    }
}

/// Two-pass pipeline: HTML → content root → blocks.
pub fn extract_document(
    html: &str,
    page_url: &Url,
    fallback_title: &str,
    opts: &ExtractOptions,
) -> Result<ExtractedDocument, BookError> {
    let doc = Html::parse_document(html);

    let root = readability::content_root(&doc)
        .ok_or_else(|| BookError::ExtractionFailed("page has no body".into()))?;

    let chars = visible_text(root).chars().count();
    if chars < opts.min_content_chars {
        return Err(BookError::ExtractionTooThin {
            chars,
            min: opts.min_content_chars,
        });
    }

    let heading = primary_heading(root);
    let title = heading
        .map(visible_text)
        .or_else(|| page_title(&doc))
        .or_else(|| Some(collapse_ws(fallback_title)).filter(|t| !t.is_empty()))
        .unwrap_or_else(|| "Untitled chapter".to_string());

    let blocks = convert::convert(root, page_url, heading);
    if blocks.is_empty() {
        return Err(BookError::ExtractionFailed(format!(
            "no content blocks in {}",
            page_url
        )));
    }
    debug!(%title, blocks = blocks.len(), chars, "extracted");

    Ok(ExtractedDocument { title, blocks })
}

/// First non-empty `h1` in the root, else the first non-empty `h2`. Headings
/// inside discarded subtrees never count.
fn primary_heading(root: ElementRef<'_>) -> Option<ElementRef<'_>> {
    [&*H1, &*H2].into_iter().find_map(|sel| {
        root.select(sel)
            .find(|h| !visible_text(*h).is_empty() && !in_discarded(*h, root))
    })
}

/// Whether `el` or an ancestor below `root` is boilerplate.
fn in_discarded(el: ElementRef, root: ElementRef) -> bool {
    if is_discarded(el) {
        return true;
    }
    el.ancestors()
        .take_while(|a| a.id() != root.id())
        .filter_map(ElementRef::wrap)
        .any(is_discarded)
}

fn page_title(doc: &Html) -> Option<String> {
    doc.select(&TITLE)
        .map(|t| collapse_ws(&t.text().collect::<String>()))
        .find(|t| !t.is_empty())
}
