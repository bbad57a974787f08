//! Main-content detection: score containers by the paragraph text they hold
//! and keep the densest one.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

use crate::html::{class_and_id, is_discarded, is_inline, visible_text};

/// Paragraphs shorter than this carry no signal.
const MIN_PARAGRAPH_CHARS: usize = 25;
/// Each 100 chars of a paragraph adds one point, up to this many.
const MAX_LENGTH_BONUS: f64 = 3.0;
/// Class/id hint weight, positive or negative.
const CLASS_WEIGHT: f64 = 25.0;

static BODY_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static ANCHOR_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

static POSITIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)article|body|content|entry|hentry|main|page|post|text|blog|story|chapter|reader")
        .unwrap()
});
static NEGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)hidden|banner|combx|comment|com-|contact|foot|masthead|media|meta|outbrain|promo|related|scroll|share|shoutbox|sidebar|skyscraper|sponsor|shopping|tags|tool|widget|nav",
    )
    .unwrap()
});

/// Elements scored as one paragraph.
const PARAGRAPH_TAGS: &[&str] = &["p", "pre", "blockquote"];
/// Containers that count as a paragraph when they only hold inline content.
const LOOSE_TEXT_TAGS: &[&str] = &["div", "section", "td"];

/// Pick the content root of a parsed page: the best-scoring candidate, or
/// `<body>` when nothing scored. `None` only when the page has no body.
pub fn content_root(doc: &Html) -> Option<ElementRef<'_>> {
    let body = doc.select(&BODY_SELECTOR).next()?;

    let mut paragraphs = Vec::new();
    collect_paragraphs(body, &mut paragraphs);

    let mut index = HashMap::new();
    let mut scored: Vec<(ElementRef, f64)> = Vec::new();

    for p in paragraphs {
        let text = visible_text(p);
        let len = text.chars().count();
        if len < MIN_PARAGRAPH_CHARS {
            continue;
        }
        let commas = text.matches([',', '，']).count() as f64;
        let score = 1.0 + commas + ((len / 100) as f64).min(MAX_LENGTH_BONUS);

        let parent = p.parent().and_then(ElementRef::wrap);
        let grandparent = parent.and_then(|el| el.parent()).and_then(ElementRef::wrap);

        // Candidates keep first-seen (document) order so ties resolve the
        // same way every run.
        for (el, credit) in [(parent, score), (grandparent, score / 2.0)] {
            let Some(el) = el else { continue };
            let slot = *index.entry(el.id()).or_insert_with(|| {
                scored.push((el, initial_score(el)));
                scored.len() - 1
            });
            scored[slot].1 += credit;
        }
    }

    let best = scored
        .into_iter()
        .map(|(el, score)| (el, score * (1.0 - link_density(el))))
        .fold(None::<(ElementRef, f64)>, |best, (el, score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((el, score)),
        });

    match best {
        Some((el, score)) => {
            debug!(tag = el.value().name(), class = %class_and_id(el), score, "content root");
            Some(el)
        }
        None => {
            debug!("no scored candidates, using <body>");
            Some(body)
        }
    }
}

fn initial_score(el: ElementRef) -> f64 {
    let tag = match el.value().name() {
        "div" | "article" | "main" => 5.0,
        "pre" | "td" | "blockquote" => 3.0,
        "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" | "form" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
        _ => 0.0,
    };
    tag + class_weight(el)
}

fn class_weight(el: ElementRef) -> f64 {
    let hints = class_and_id(el);
    if hints.trim().is_empty() {
        return 0.0;
    }
    let mut weight = 0.0;
    if POSITIVE_RE.is_match(&hints) {
        weight += CLASS_WEIGHT;
    }
    if NEGATIVE_RE.is_match(&hints) {
        weight -= CLASS_WEIGHT;
    }
    weight
}

/// Share of the element's visible text that sits inside links.
fn link_density(el: ElementRef) -> f64 {
    let total = visible_text(el).chars().count();
    if total == 0 {
        return 0.0;
    }
    let linked: usize = el
        .select(&ANCHOR_SELECTOR)
        .map(|a| visible_text(a).chars().count())
        .sum();
    (linked as f64 / total as f64).min(1.0)
}

/// Paragraph-like elements under `el`, skipping boilerplate subtrees.
fn collect_paragraphs<'a>(el: ElementRef<'a>, out: &mut Vec<ElementRef<'a>>) {
    for child in el.children().filter_map(ElementRef::wrap) {
        if is_discarded(child) {
            continue;
        }
        let name = child.value().name();
        if PARAGRAPH_TAGS.contains(&name) {
            out.push(child);
        } else if LOOSE_TEXT_TAGS.contains(&name) && only_inline(child) {
            out.push(child);
        } else {
            collect_paragraphs(child, out);
        }
    }
}

fn only_inline(el: ElementRef) -> bool {
    el.children().all(|c| match c.value() {
        Node::Element(e) => is_inline(e.name()) || e.name() == "br",
        _ => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_hints(html: &str) -> String {
        let doc = Html::parse_document(html);
        let root = content_root(&doc).unwrap();
        format!("{} {}", root.value().name(), class_and_id(root))
    }

    const LONG: &str = "It was a bright cold day in April, and the clocks were striking thirteen, as they always did.";

    #[test]
    fn picks_dense_container_over_navigation() {
        let html = format!(
            r#"<body>
                <div class="links"><p><a href="/a">{LONG}</a></p></div>
                <div class="story"><p>{LONG}</p><p>{LONG}</p><p>{LONG}</p></div>
            </body>"#
        );
        assert_eq!(root_hints(&html), "div story");
    }

    #[test]
    fn ignores_text_inside_sidebar() {
        let html = format!(
            r#"<body>
                <aside><p>{LONG}</p><p>{LONG}</p><p>{LONG}</p><p>{LONG}</p></aside>
                <div id="main-text"><p>{LONG}</p></div>
            </body>"#
        );
        assert_eq!(root_hints(&html), "div  main-text");
    }

    #[test]
    fn loose_text_div_counts_as_paragraph() {
        let html = format!(
            r#"<body><section class="reader"><div>{LONG}</div><div>{LONG} <i>again</i></div></section></body>"#
        );
        assert_eq!(root_hints(&html), "section reader");
    }

    #[test]
    fn falls_back_to_body() {
        assert_eq!(root_hints("<body><p>Short.</p></body>"), "body ");
    }

    #[test]
    fn fixture_prefers_article() {
        let html = std::fs::read_to_string("tests/fixtures/chapter.html").unwrap();
        assert_eq!(root_hints(&html), "article chapter-content");
    }
}
