//! The plain-text form of a chapter: a small Markdown dialect written by the
//! download stage and read back by the combine stage.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::{ContentBlock, ExtractedDocument};

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());
static IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^!\[((?:[^\]\\]|\\.)*)\]\((\S+)\)$").unwrap());
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-+]\s+(.+)$").unwrap());
static NUMBERED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+[.)]\s+(.+)$").unwrap());
static QUOTE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^>\s?(.*)$").unwrap());
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(`{3,})\s*$").unwrap());
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[((?:[^\]\\]|\\.)*)\]\(([^)\s]*)\)").unwrap());

/// Render a chapter. The first line is `# <title>`; blocks follow, separated
/// by blank lines.
pub fn render(doc: &ExtractedDocument) -> String {
    let mut out = format!("# {}\n", single_line(&doc.title));
    for block in &doc.blocks {
        out.push('\n');
        match block {
            ContentBlock::Heading { level, text } => {
                out.push_str(&"#".repeat(*level as usize));
                out.push(' ');
                out.push_str(&single_line(text));
                out.push('\n');
            }
            ContentBlock::Paragraph(text) => {
                out.push_str(&guard_line_start(&single_line(text)));
                out.push('\n');
            }
            ContentBlock::List { ordered, items } => {
                for (i, item) in items.iter().enumerate() {
                    if *ordered {
                        out.push_str(&format!("{}. ", i + 1));
                    } else {
                        out.push_str("- ");
                    }
                    out.push_str(&single_line(item));
                    out.push('\n');
                }
            }
            ContentBlock::Image { alt, src } => {
                out.push_str(&format!(
                    "![{}]({})\n",
                    single_line(alt).replace('\\', "\\\\").replace(']', "\\]"),
                    src.replace(' ', "%20").replace('(', "%28").replace(')', "%29")
                ));
            }
            ContentBlock::Blockquote(text) => {
                out.push_str("> ");
                out.push_str(&single_line(text));
                out.push('\n');
            }
            ContentBlock::CodeBlock(text) => {
                let fence = fence_for(text);
                out.push_str(&fence);
                out.push('\n');
                out.push_str(text);
                out.push('\n');
                out.push_str(&fence);
                out.push('\n');
            }
        }
    }
    out
}

/// Read a chapter back. Without a leading `# ` title line, `fallback_title`
/// is used.
pub fn parse(text: &str, fallback_title: &str) -> ExtractedDocument {
    let text = text.replace("\r\n", "\n");
    let lines: Vec<&str> = text.lines().collect();
    let mut title: Option<String> = None;
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let raw = lines[i];
        let line = raw.trim();

        // ── Fenced code keeps its lines verbatim ──
        if let Some(caps) = FENCE_RE.captures(line) {
            flush_paragraph(&mut paragraph, &mut blocks);
            let fence = caps[1].to_string();
            let mut code = Vec::new();
            i += 1;
            while i < lines.len() && lines[i].trim() != fence {
                code.push(lines[i]);
                i += 1;
            }
            push(&mut blocks, ContentBlock::CodeBlock(code.join("\n")));
            i += 1;
            continue;
        }

        if line.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
            i += 1;
            continue;
        }

        // ── Heading; the first `#` line before any block is the title ──
        if let Some(caps) = HEADING_RE.captures(line) {
            flush_paragraph(&mut paragraph, &mut blocks);
            let level = caps[1].len() as u8;
            let text = caps[2].trim().to_string();
            if title.is_none() && blocks.is_empty() && level == 1 {
                title = Some(text);
            } else {
                push(&mut blocks, ContentBlock::heading(level, text));
            }
            i += 1;
            continue;
        }

        if let Some(caps) = IMAGE_RE.captures(line) {
            flush_paragraph(&mut paragraph, &mut blocks);
            push(
                &mut blocks,
                ContentBlock::Image {
                    alt: unescape_alt(&caps[1]),
                    src: caps[2].to_string(),
                },
            );
            i += 1;
            continue;
        }

        // ── Quote: consecutive `>` lines form one block ──
        if QUOTE_RE.is_match(line) {
            flush_paragraph(&mut paragraph, &mut blocks);
            let mut parts = Vec::new();
            while i < lines.len() {
                match QUOTE_RE.captures(lines[i].trim()) {
                    Some(caps) => parts.push(caps[1].trim().to_string()),
                    None => break,
                }
                i += 1;
            }
            push(&mut blocks, ContentBlock::Blockquote(join_nonempty(&parts)));
            continue;
        }

        // ── Lists: consecutive items of one kind ──
        let ordered = NUMBERED_RE.is_match(line);
        if ordered || BULLET_RE.is_match(line) {
            flush_paragraph(&mut paragraph, &mut blocks);
            let re: &Regex = if ordered { &NUMBERED_RE } else { &BULLET_RE };
            let mut items = Vec::new();
            while i < lines.len() {
                match re.captures(lines[i].trim()) {
                    Some(caps) => items.push(caps[1].trim().to_string()),
                    None => break,
                }
                i += 1;
            }
            push(&mut blocks, ContentBlock::List { ordered, items });
            continue;
        }

        paragraph.push(line);
        i += 1;
    }
    flush_paragraph(&mut paragraph, &mut blocks);

    ExtractedDocument {
        title: title.unwrap_or_else(|| fallback_title.to_string()),
        blocks,
    }
}

/// Inline markup reduced to the text a reader sees: link targets, emphasis
/// markers and escapes dropped.
pub fn strip_inline(text: &str) -> String {
    let linked = LINK_RE.replace_all(text, "$1");
    let mut out = String::with_capacity(linked.len());
    let mut chars = linked.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '*' | '`' => {}
            _ => out.push(c),
        }
    }
    out
}

fn push(blocks: &mut Vec<ContentBlock>, block: ContentBlock) {
    if block.has_content() {
        blocks.push(block);
    }
}

fn flush_paragraph(lines: &mut Vec<&str>, blocks: &mut Vec<ContentBlock>) {
    if lines.is_empty() {
        return;
    }
    let mut text = lines.join(" ");
    lines.clear();
    if let Some(rest) = text.strip_prefix('\\') {
        if rest.starts_with(is_block_marker) {
            text = rest.to_string();
        }
    }
    push(blocks, ContentBlock::Paragraph(text));
}

fn join_nonempty(parts: &[String]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Characters that would turn a paragraph line into another block kind.
fn is_block_marker(c: char) -> bool {
    matches!(c, '#' | '>' | '-' | '+' | '!') || c.is_ascii_digit()
}

/// Escape a leading character that would be read as a block marker.
fn guard_line_start(line: &str) -> String {
    let needs_guard = line.starts_with(is_block_marker)
        && (HEADING_RE.is_match(line)
            || QUOTE_RE.is_match(line)
            || BULLET_RE.is_match(line)
            || NUMBERED_RE.is_match(line)
            || IMAGE_RE.is_match(line));
    if needs_guard {
        format!("\\{line}")
    } else {
        line.to_string()
    }
}

fn fence_for(code: &str) -> String {
    let longest = code
        .lines()
        .filter_map(|l| {
            let t = l.trim();
            (!t.is_empty() && t.chars().all(|c| c == '`')).then_some(t.len())
        })
        .max()
        .unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}

fn unescape_alt(alt: &str) -> String {
    let mut out = String::with_capacity(alt.len());
    let mut chars = alt.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ExtractedDocument {
        ExtractedDocument {
            title: "Chapter 1: The Storm".into(),
            blocks: vec![
                ContentBlock::Paragraph("The storm *came* in, see [notes](https://x.org/n).".into()),
                ContentBlock::heading(1, "A level one heading"),
                ContentBlock::heading(3, "Deeper"),
                ContentBlock::List { ordered: false, items: vec!["one".into(), "two".into()] },
                ContentBlock::List { ordered: true, items: vec!["first".into(), "second".into()] },
                ContentBlock::Image { alt: "A [lamp]".into(), src: "https://x.org/a.png".into() },
                ContentBlock::Blockquote("Keep the light.".into()),
                ContentBlock::CodeBlock("  log: 02:00\n\n  log: 03:00".into()),
                ContentBlock::Paragraph("# not a heading".into()),
                ContentBlock::Paragraph("1. not a list".into()),
                ContentBlock::Paragraph("- nor this".into()),
                ContentBlock::Paragraph(r"\* escaped star stays".into()),
            ],
        }
    }

    #[test]
    fn round_trip() {
        let doc = sample();
        let text = render(&doc);
        assert_eq!(parse(&text, "fallback"), doc);
    }

    #[test]
    fn layout_of_rendered_file() {
        let text = render(&sample());
        assert!(text.starts_with("# Chapter 1: The Storm\n\n"));
        assert!(text.contains("\n### Deeper\n"));
        assert!(text.contains("\n- one\n- two\n"));
        assert!(text.contains("\n1. first\n2. second\n"));
        assert!(text.contains("\n\\# not a heading\n"));
        assert!(text.contains("\n```\n  log: 02:00\n\n  log: 03:00\n```\n"));
    }

    #[test]
    fn code_with_fence_inside_gets_longer_fence() {
        let doc = ExtractedDocument {
            title: "T".into(),
            blocks: vec![ContentBlock::CodeBlock("```\nnested\n```".into())],
        };
        let text = render(&doc);
        assert!(text.contains("````\n```\nnested\n```\n````"));
        assert_eq!(parse(&text, "x"), doc);
    }

    #[test]
    fn missing_title_uses_fallback() {
        let doc = parse("Just a paragraph\nwrapped over lines.\n\n## Heading", "chapter-0003");
        assert_eq!(doc.title, "chapter-0003");
        assert_eq!(
            doc.blocks,
            vec![
                ContentBlock::Paragraph("Just a paragraph wrapped over lines.".into()),
                ContentBlock::heading(2, "Heading"),
            ]
        );
    }

    #[test]
    fn hand_written_markdown_reads() {
        // Plain Markdown as a person or another tool would write it.
        let doc = parse("# Chapter 2\n\n## The Lamp\n\nText here.\n\n* * *\n", "x");
        assert_eq!(doc.title, "Chapter 2");
        assert_eq!(doc.blocks[0], ContentBlock::heading(2, "The Lamp"));
        assert_eq!(doc.blocks[1], ContentBlock::Paragraph("Text here.".into()));
    }

    #[test]
    fn strip_inline_markup() {
        assert_eq!(
            strip_inline(r"A *b* **c** `d` [e \[x\]](https://y.z/q) 2 \* 3"),
            "A b c d e [x] 2 * 3"
        );
    }
}
