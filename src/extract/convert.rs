//! Walk a content root and turn it into [`ContentBlock`]s in source order.

use scraper::{ElementRef, Node};
use url::Url;

use crate::html::{collapse_ws, is_discarded, is_inline, resolve_href};
use crate::model::ContentBlock;

/// Stands in for an image met inside inline content until the paragraph
/// around it is split.
const OBJECT: char = '\u{FFFC}';

/// Convert the subtree under `root` into blocks. `skip` is left out of the
/// output (the heading already used as the document title).
pub fn convert(root: ElementRef, base: &Url, skip: Option<ElementRef>) -> Vec<ContentBlock> {
    let mut conv = Converter {
        base,
        skip,
        blocks: Vec::new(),
        inline: String::new(),
        pending_images: Vec::new(),
    };
    conv.walk(root);
    conv.flush();
    conv.blocks
}

struct Converter<'a, 'u> {
    base: &'u Url,
    skip: Option<ElementRef<'a>>,
    blocks: Vec<ContentBlock>,
    /// Inline markup gathered for the paragraph being built.
    inline: String,
    /// Images met inside inline content, emitted right after their paragraph.
    pending_images: Vec<ContentBlock>,
}

impl<'a> Converter<'a, '_> {
    fn walk(&mut self, el: ElementRef<'a>) {
        for child in el.children() {
            match child.value() {
                Node::Text(t) => self.inline.push_str(&escape(t)),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.element(child_el);
                    }
                }
                _ => {}
            }
        }
    }

    fn element(&mut self, el: ElementRef<'a>) {
        if is_discarded(el) || self.skip.is_some_and(|s| s.id() == el.id()) {
            return;
        }
        let name = el.value().name();
        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.flush();
                let level = name[1..].parse().unwrap_or(1);
                let text = collapse_ws(&drop_objects(&self.inline_markup(el)));
                self.push(ContentBlock::heading(level, text));
                self.flush_images();
            }
            "ul" | "ol" => {
                self.flush();
                let mut items = Vec::new();
                self.list_items(el, &mut items);
                self.push(ContentBlock::List {
                    ordered: name == "ol",
                    items,
                });
                self.flush_images();
            }
            "blockquote" => {
                self.flush();
                let text = collapse_ws(&drop_objects(&self.inline_markup(el)));
                self.push(ContentBlock::Blockquote(text));
                self.flush_images();
            }
            "pre" => {
                self.flush();
                self.push(ContentBlock::CodeBlock(code_text(el)));
            }
            "img" => {
                self.flush();
                if let Some(image) = self.image(el) {
                    self.push(image);
                }
            }
            "code" if is_block_code(el) => {
                self.flush();
                self.push(ContentBlock::CodeBlock(code_text(el)));
            }
            "br" => self.inline.push(' '),
            "hr" => self.flush(),
            _ if is_inline(name) => {
                let markup = self.inline_element(el);
                self.inline.push_str(&markup);
            }
            // p, div, section, table cells and every other container: a
            // paragraph boundary on each side.
            _ => {
                self.flush();
                self.walk(el);
                self.flush();
            }
        }
    }

    fn push(&mut self, block: ContentBlock) {
        if block.has_content() {
            self.blocks.push(block);
        }
    }

    /// Close the paragraph being built. Images that sat inside its inline
    /// content split it where they stood.
    fn flush(&mut self) {
        let inline = std::mem::take(&mut self.inline);
        let mut images = std::mem::take(&mut self.pending_images).into_iter();
        for (i, piece) in inline.split(OBJECT).enumerate() {
            if i > 0 {
                if let Some(image) = images.next() {
                    self.push(image);
                }
            }
            self.push(ContentBlock::Paragraph(collapse_ws(piece)));
        }
        for image in images {
            self.push(image);
        }
    }

    fn flush_images(&mut self) {
        for image in std::mem::take(&mut self.pending_images) {
            self.push(image);
        }
    }

    /// Inline markup for an element and its descendants.
    fn inline_markup(&mut self, el: ElementRef<'a>) -> String {
        let mut out = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(t) => out.push_str(&escape(t)),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        out.push_str(&self.inline_element(child_el));
                    }
                }
                _ => {}
            }
        }
        out
    }

    fn inline_element(&mut self, el: ElementRef<'a>) -> String {
        if is_discarded(el) || self.skip.is_some_and(|s| s.id() == el.id()) {
            return String::new();
        }
        match el.value().name() {
            "em" | "i" | "cite" | "dfn" | "var" => wrap("*", &self.inline_markup(el)),
            "strong" | "b" => wrap("**", &self.inline_markup(el)),
            "code" | "kbd" | "samp" | "tt" => {
                let raw: String = el.text().collect();
                wrap_code(&raw)
            }
            "a" => {
                let inner = self.inline_markup(el);
                let href = el
                    .value()
                    .attr("href")
                    .and_then(|h| resolve_href(self.base, h));
                match href {
                    Some(url) => per_segment(&inner, |seg| {
                        let (lead, body, trail) = split_ws(seg);
                        if body.is_empty() {
                            return seg.to_string();
                        }
                        format!("{lead}[{body}]({}){trail}", escape_url(url.as_str()))
                    }),
                    None => inner,
                }
            }
            "br" => " ".to_string(),
            "img" => match self.image(el) {
                Some(image) => {
                    self.pending_images.push(image);
                    OBJECT.to_string()
                }
                None => String::new(),
            },
            "ul" | "ol" => {
                // Nested inside inline content (a list in a blockquote):
                // keep the items as running text.
                let mut items = Vec::new();
                self.list_items(el, &mut items);
                format!(" {} ", items.join("; "))
            }
            name if is_inline(name) => self.inline_markup(el),
            _ => format!(" {} ", self.inline_markup(el)),
        }
    }

    /// Items of a list in order. Nested lists are flattened right after the
    /// item that holds them.
    fn list_items(&mut self, list: ElementRef<'a>, items: &mut Vec<String>) {
        for li in list.children().filter_map(ElementRef::wrap) {
            if is_discarded(li) {
                continue;
            }
            if li.value().name() != "li" {
                // Stray markup between items still holds items of its own.
                self.list_items(li, items);
                continue;
            }
            let mut text = String::new();
            let mut nested = Vec::new();
            for child in li.children() {
                match child.value() {
                    Node::Text(t) => text.push_str(&escape(t)),
                    Node::Element(e) if matches!(e.name(), "ul" | "ol") => {
                        if let Some(sub) = ElementRef::wrap(child) {
                            nested.push(sub);
                        }
                    }
                    Node::Element(_) => {
                        if let Some(child_el) = ElementRef::wrap(child) {
                            text.push_str(&self.inline_element(child_el));
                        }
                    }
                    _ => {}
                }
            }
            let text = collapse_ws(&drop_objects(&text));
            if !text.is_empty() {
                items.push(text);
            }
            for sub in nested {
                self.list_items(sub, items);
            }
        }
    }

    fn image(&self, el: ElementRef) -> Option<ContentBlock> {
        let v = el.value();
        let src = v
            .attr("src")
            .filter(|s| !s.trim().is_empty() && !s.starts_with("data:"))
            .or_else(|| v.attr("data-src"))?;
        let url = resolve_href(self.base, src)?;
        Some(ContentBlock::Image {
            alt: collapse_ws(v.attr("alt").unwrap_or("")),
            src: url.to_string(),
        })
    }
}

/// Backslash-escape characters that carry inline markup meaning.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().filter(|&c| c != OBJECT) {
        if matches!(c, '\\' | '*' | '`' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_url(url: &str) -> String {
    url.replace('(', "%28").replace(')', "%29")
}

/// Split off leading and trailing whitespace so markers hug the text.
fn split_ws(s: &str) -> (&str, &str, &str) {
    let body = s.trim();
    if body.is_empty() {
        return (s, "", "");
    }
    let start = s.len() - s.trim_start().len();
    let end = start + body.len();
    (&s[..start], body, &s[end..])
}

/// Apply `f` to each run of text between image placeholders, so markers
/// never straddle a paragraph split.
fn per_segment(inner: &str, f: impl Fn(&str) -> String) -> String {
    inner
        .split(OBJECT)
        .map(f)
        .collect::<Vec<_>>()
        .join(OBJECT.encode_utf8(&mut [0; 4]))
}

fn drop_objects(text: &str) -> String {
    text.replace(OBJECT, " ")
}

fn wrap(marker: &str, inner: &str) -> String {
    per_segment(inner, |seg| {
        let (lead, body, trail) = split_ws(seg);
        if body.is_empty() {
            return lead.to_string();
        }
        format!("{lead}{marker}{body}{marker}{trail}")
    })
}

fn wrap_code(raw: &str) -> String {
    let raw = raw.replace(OBJECT, "");
    let (lead, body, trail) = split_ws(&raw);
    if body.is_empty() {
        return lead.to_string();
    }
    let body = collapse_ws(body).replace('`', "'");
    format!("{lead}`{body}`{trail}")
}

/// A `<code>` that stands alone in its container or spans several lines is a
/// code block, not inline code.
fn is_block_code(el: ElementRef) -> bool {
    let raw: String = el.text().collect();
    if raw.trim().contains('\n') {
        return true;
    }
    let Some(parent) = el.parent() else {
        return false;
    };
    parent.children().all(|c| {
        c.id() == el.id()
            || match c.value() {
                Node::Text(t) => t.trim().is_empty(),
                Node::Comment(_) => true,
                _ => false,
            }
    })
}

/// Text of a `<pre>` with its line structure intact.
fn code_text(el: ElementRef) -> String {
    let raw: String = el.text().collect();
    let raw = raw.replace("\r\n", "\n");
    let lines: Vec<&str> = raw.lines().collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    match (first, last) {
        (Some(a), Some(b)) => lines[a..=b]
            .iter()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
