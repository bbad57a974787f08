//! Small DOM helpers shared by link discovery and content extraction.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Node};
use url::Url;

/// Elements whose subtrees never hold chapter text.
const DISCARDED_TAGS: &[&str] = &[
    "nav", "aside", "footer", "script", "style", "noscript", "template", "form", "iframe",
    "button", "select", "svg", "canvas", "object", "embed", "head",
];

/// Phrasing elements that flow inside a line of text.
pub const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "cite", "code", "data", "del", "dfn", "em", "font", "i",
    "ins", "kbd", "mark", "q", "s", "samp", "small", "span", "strike", "strong", "sub", "sup",
    "time", "tt", "u", "var", "wbr",
];

pub fn is_inline(name: &str) -> bool {
    INLINE_TAGS.contains(&name)
}

static BOILERPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(^|[\s_-])(ads?|advert\w*|banner|sidebar|comments?|share|sharing|social|sponsor\w*|popup|modal|breadcrumbs?|cookie\w*|related|menu|nav|navigation|navbar|pager|pagination|promo|newsletter)($|[\s_-])",
    )
    .unwrap()
});

/// Content-container hints that outweigh a boilerplate token in the same
/// class list (`entry-content ad-free`).
static CONTENT_HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|[\s_-])(content|article|entry|post|main|body|story)($|[\s_-])").unwrap()
});

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Class and id joined, for pattern matching.
pub fn class_and_id(el: ElementRef) -> String {
    let v = el.value();
    let mut out = v.attr("class").unwrap_or("").to_string();
    if let Some(id) = v.id() {
        out.push(' ');
        out.push_str(id);
    }
    out
}

/// Whether the element is navigation, script, or ad-like boilerplate.
pub fn is_discarded(el: ElementRef) -> bool {
    let name = el.value().name();
    if DISCARDED_TAGS.contains(&name) {
        return true;
    }
    // Never throw away the document skeleton on a class name.
    if matches!(name, "html" | "body" | "main" | "article") {
        return false;
    }
    if el.value().attr("hidden").is_some() || el.value().attr("aria-hidden") == Some("true") {
        return true;
    }
    let hints = class_and_id(el);
    BOILERPLATE_RE.is_match(&hints) && !CONTENT_HINT_RE.is_match(&hints)
}

/// Visible text of an element, skipping discarded subtrees.
pub fn visible_text(el: ElementRef) -> String {
    let mut out = String::new();
    push_text(el, &mut out);
    collapse_ws(&out)
}

fn push_text(el: ElementRef, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    if !is_discarded(child_el) {
                        let inline = is_inline(child_el.value().name());
                        if !inline {
                            out.push(' ');
                        }
                        push_text(child_el, out);
                        if !inline {
                            out.push(' ');
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

/// Text of an element including everything (used for anchors, where the
/// whole label counts).
pub fn anchor_text(el: ElementRef) -> String {
    collapse_ws(&el.text().collect::<String>())
}

/// Resolve `href` against `base`, keeping only http(s) targets.
pub fn resolve_href(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}
