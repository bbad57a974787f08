use percent_encoding::percent_decode_str;
use url::Url;

/// Deepest heading level a block may carry.
pub const MAX_HEADING_LEVEL: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterLink {
    pub title: String,
    pub url: Url,
}

impl ChapterLink {
    pub fn new(title: impl Into<String>, url: Url) -> Self {
        Self {
            title: title.into(),
            url,
        }
    }

    /// Dedup key: see [`normalize_url`].
    pub fn key(&self) -> String {
        normalize_url(&self.url)
    }
}

/// Scheme, host, port, path and query. The fragment never distinguishes two
/// chapters; the query can (`?chapter=2`), so it stays. A trailing slash on a
/// non-root path is dropped.
pub fn normalize_url(url: &Url) -> String {
    let mut out = format!("{}://", url.scheme());
    if let Some(host) = url.host_str() {
        out.push_str(&host.to_ascii_lowercase());
    }
    if let Some(port) = url.port() {
        out.push_str(&format!(":{port}"));
    }
    let path = url.path();
    if path.len() > 1 {
        out.push_str(path.trim_end_matches('/'));
    } else {
        out.push('/');
    }
    if let Some(q) = url.query().filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(q);
    }
    out
}

/// Last non-empty path segment, percent-decoded, with `-`/`_` read as spaces.
pub fn title_from_url(url: &Url) -> Option<String> {
    let segment = url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()?;
    let decoded = percent_decode_str(segment).decode_utf8_lossy().into_owned();
    let stem = decoded
        .rsplit_once('.')
        .filter(|(_, ext)| matches!(*ext, "html" | "htm" | "xhtml" | "php" | "aspx"))
        .map(|(stem, _)| stem.to_string())
        .unwrap_or(decoded);
    let title = stem.replace(['-', '_'], " ").trim().to_string();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// One unit of chapter content. Inline formatting lives inside the text as
/// markup (`*em*`, `**strong**`, `` `code` ``, `[text](url)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    Heading { level: u8, text: String },
    Paragraph(String),
    List { ordered: bool, items: Vec<String> },
    Image { alt: String, src: String },
    Blockquote(String),
    CodeBlock(String),
}

impl ContentBlock {
    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        ContentBlock::Heading {
            level: level.clamp(1, MAX_HEADING_LEVEL),
            text: text.into(),
        }
    }

    /// Whether the block carries any text worth keeping.
    pub fn has_content(&self) -> bool {
        match self {
            ContentBlock::Heading { text, .. }
            | ContentBlock::Paragraph(text)
            | ContentBlock::Blockquote(text) => !text.trim().is_empty(),
            ContentBlock::CodeBlock(text) => !text.trim().is_empty(),
            ContentBlock::List { items, .. } => items.iter().any(|i| !i.trim().is_empty()),
            ContentBlock::Image { src, .. } => !src.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub title: String,
    pub blocks: Vec<ContentBlock>,
}

impl ExtractedDocument {
    pub fn text_len(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Heading { text, .. }
                | ContentBlock::Paragraph(text)
                | ContentBlock::Blockquote(text)
                | ContentBlock::CodeBlock(text) => text.chars().count(),
                ContentBlock::List { items, .. } => items.iter().map(|i| i.chars().count()).sum(),
                ContentBlock::Image { alt, .. } => alt.chars().count(),
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn normalize_drops_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_url(&url("https://Example.com/book/ch-1/#top")),
            "https://example.com/book/ch-1"
        );
        assert_eq!(normalize_url(&url("https://example.com")), "https://example.com/");
    }

    #[test]
    fn normalize_keeps_query() {
        let a = normalize_url(&url("https://example.com/read?chapter=1"));
        let b = normalize_url(&url("https://example.com/read?chapter=2"));
        assert_ne!(a, b);
    }

    #[test]
    fn title_from_last_segment() {
        assert_eq!(
            title_from_url(&url("https://example.com/book/the-first-step.html")).as_deref(),
            Some("the first step")
        );
        assert_eq!(
            title_from_url(&url("https://example.com/book/chapter%202/")).as_deref(),
            Some("chapter 2")
        );
        assert_eq!(title_from_url(&url("https://example.com/")), None);
    }

    #[test]
    fn heading_level_clamped() {
        assert_eq!(ContentBlock::heading(9, "x"), ContentBlock::Heading { level: 6, text: "x".into() });
        assert_eq!(ContentBlock::heading(0, "x"), ContentBlock::Heading { level: 1, text: "x".into() });
    }

    #[test]
    fn empty_blocks_have_no_content() {
        assert!(!ContentBlock::Paragraph("  ".into()).has_content());
        assert!(!ContentBlock::List { ordered: false, items: vec![String::new()] }.has_content());
        assert!(ContentBlock::Image { alt: String::new(), src: "https://x/y.png".into() }.has_content());
    }
}
