//! Paginates a composite document into a PDF. Text is set in an embedded
//! TrueType face when one is configured or found on the system, else in the
//! built-in Helvetica and Courier faces. Layout is a simple top-down flow with
//! greedy word wrap.

use std::fs;
use std::path::{Path, PathBuf};

use printpdf::{
    BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference,
    PdfPageIndex,
};
use tracing::{debug, warn};

use crate::assemble::{CompositeDocument, Segment};
use crate::error::BookError;
use crate::markup::strip_inline;
use crate::model::ContentBlock;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 20.0;
const TEXT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;

const PT_TO_MM: f32 = 0.3528;
const LINE_SPACING: f32 = 1.4;
const BLOCK_GAP: f32 = 3.0;
const INDENT: f32 = 8.0;

// Average glyph width as a fraction of the font size.
const SANS_WIDTH: f32 = 0.5;
const BOLD_WIDTH: f32 = 0.55;
const MONO_WIDTH: f32 = 0.6;

// Tried in order when no font file is configured.
const SYSTEM_SANS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];
const SYSTEM_MONO: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationMono-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Courier New.ttf",
    "C:\\Windows\\Fonts\\cour.ttf",
];

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub title: String,
    /// Body size in points; headings scale from it.
    pub font_size: f32,
    pub fonts: FontSource,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum FontSource {
    /// First well-known system TrueType font found, else built-in.
    #[default]
    System,
    /// Built-in PDF fonts only; text outside ASCII is transliterated.
    Builtin,
    /// Explicit TrueType files. Failing to load them is an error.
    Files {
        regular: PathBuf,
        mono: Option<PathBuf>,
    },
}

#[derive(Clone, Copy)]
enum Face {
    Regular,
    Bold,
    Italic,
    Mono,
}

impl Face {
    fn width_factor(self) -> f32 {
        match self {
            Face::Regular | Face::Italic => SANS_WIDTH,
            Face::Bold => BOLD_WIDTH,
            Face::Mono => MONO_WIDTH,
        }
    }
}

/// A loaded face. Only embedded TrueType faces can show text beyond ASCII.
#[derive(Clone)]
struct FontFace {
    font: IndirectFontRef,
    unicode: bool,
}

impl FontFace {
    fn builtin(doc: &PdfDocumentReference, font: BuiltinFont) -> Result<Self, BookError> {
        Ok(Self {
            font: doc.add_builtin_font(font).map_err(render_err)?,
            unicode: false,
        })
    }

    fn embedded(doc: &PdfDocumentReference, path: &Path) -> Result<Self, BookError> {
        let bytes = fs::read(path).map_err(|e| {
            BookError::RenderFailed(format!("cannot read font {}: {e}", path.display()))
        })?;
        let font = doc.add_external_font(bytes.as_slice()).map_err(|e| {
            BookError::RenderFailed(format!("cannot load font {}: {e}", path.display()))
        })?;
        Ok(Self {
            font,
            unicode: true,
        })
    }
}

struct Fonts {
    regular: FontFace,
    bold: FontFace,
    italic: FontFace,
    mono: FontFace,
}

impl Fonts {
    fn load(doc: &PdfDocumentReference, source: &FontSource) -> Result<Self, BookError> {
        match source {
            FontSource::Builtin => Self::builtin(doc),
            FontSource::Files { regular, mono } => Self::embedded(doc, regular, mono.as_deref()),
            FontSource::System => {
                let Some(regular) = first_existing(SYSTEM_SANS) else {
                    debug!("no system TrueType font found, using built-in fonts");
                    return Self::builtin(doc);
                };
                let mono = first_existing(SYSTEM_MONO);
                match Self::embedded(doc, &regular, mono.as_deref()) {
                    Ok(fonts) => {
                        debug!(font = %regular.display(), "embedding system font");
                        Ok(fonts)
                    }
                    Err(e) => {
                        warn!("{e}; falling back to built-in fonts");
                        Self::builtin(doc)
                    }
                }
            }
        }
    }

    fn builtin(doc: &PdfDocumentReference) -> Result<Self, BookError> {
        Ok(Self {
            regular: FontFace::builtin(doc, BuiltinFont::Helvetica)?,
            bold: FontFace::builtin(doc, BuiltinFont::HelveticaBold)?,
            italic: FontFace::builtin(doc, BuiltinFont::HelveticaOblique)?,
            mono: FontFace::builtin(doc, BuiltinFont::Courier)?,
        })
    }

    /// Bold and italic come from sibling files (`X-Bold.ttf`) when present,
    /// else reuse the regular face. Without a mono file, code uses Courier.
    fn embedded(
        doc: &PdfDocumentReference,
        regular: &Path,
        mono: Option<&Path>,
    ) -> Result<Self, BookError> {
        let base = FontFace::embedded(doc, regular)?;
        let variant = |styles: &[&str]| -> Result<FontFace, BookError> {
            match sibling_font(regular, styles) {
                Some(path) => FontFace::embedded(doc, &path),
                None => Ok(base.clone()),
            }
        };
        let bold = variant(&["Bold"])?;
        let italic = variant(&["Oblique", "Italic"])?;
        let mono = match mono {
            Some(path) => FontFace::embedded(doc, path)?,
            None => FontFace::builtin(doc, BuiltinFont::Courier)?,
        };
        Ok(Self {
            regular: base,
            bold,
            italic,
            mono,
        })
    }

    fn get(&self, face: Face) -> &FontFace {
        match face {
            Face::Regular => &self.regular,
            Face::Bold => &self.bold,
            Face::Italic => &self.italic,
            Face::Mono => &self.mono,
        }
    }
}

/// Cursor over the current page. `y` is the baseline of the last line, in mm
/// from the bottom edge.
struct PageWriter {
    doc: PdfDocumentReference,
    fonts: Fonts,
    page: PdfPageIndex,
    layer: PdfLayerReference,
    y: f32,
    pages: usize,
    break_pending: bool,
}

impl PageWriter {
    fn new(title: &str, source: &FontSource) -> Result<Self, BookError> {
        let (doc, page, layer) = PdfDocument::new(
            to_pdf_text(title),
            Mm(PAGE_WIDTH),
            Mm(PAGE_HEIGHT),
            "Layer 1",
        );
        let fonts = Fonts::load(&doc, source)?;
        let layer = doc.get_page(page).get_layer(layer);
        Ok(Self {
            doc,
            fonts,
            page,
            layer,
            y: PAGE_HEIGHT - MARGIN,
            pages: 1,
            break_pending: false,
        })
    }

    fn new_page(&mut self) {
        let (page, layer) = self
            .doc
            .add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        self.page = page;
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = PAGE_HEIGHT - MARGIN;
        self.pages += 1;
        self.break_pending = false;
    }

    /// Start a fresh page if a break is pending or `height` does not fit.
    fn reserve(&mut self, height: f32) {
        if self.break_pending || self.y - height < MARGIN {
            self.new_page();
        }
    }

    fn gap(&mut self, mm: f32) {
        self.y -= mm;
    }

    fn line(&mut self, text: &str, face: Face, size: f32, indent: f32) {
        let height = size * PT_TO_MM * LINE_SPACING;
        self.reserve(height);
        self.y -= height;
        let font = self.fonts.get(face);
        self.layer.use_text(
            face_text(text, font.unicode),
            size,
            Mm(MARGIN + indent),
            Mm(self.y),
            &font.font,
        );
    }

    /// Wrapped text; `first` prefixes the first line, later lines hang under it.
    fn text(&mut self, text: &str, face: Face, size: f32, indent: f32, first: &str) {
        let hang = chars_width(first.chars().count(), face, size);
        let max = max_chars(TEXT_WIDTH - indent - hang, face, size);
        for (i, line) in wrap(text, max).iter().enumerate() {
            if i == 0 {
                self.line(&format!("{first}{line}"), face, size, indent);
            } else {
                self.line(line, face, size, indent + hang);
            }
        }
    }

    fn bookmark(&mut self, name: &str) {
        self.doc.add_bookmark(to_pdf_text(name), self.page);
    }

    fn finish(self) -> Result<(Vec<u8>, usize), BookError> {
        let pages = self.pages;
        let bytes = self.doc.save_to_bytes().map_err(render_err)?;
        Ok((bytes, pages))
    }
}

/// Lay out the composite: a title page, then every chapter on fresh pages
/// with an outline entry.
pub fn render_pdf(doc: &CompositeDocument, opts: &RenderOptions) -> Result<Vec<u8>, BookError> {
    let base = opts.font_size;
    if !(base.is_finite() && base > 0.0) {
        return Err(BookError::RenderFailed(format!("invalid font size {base}")));
    }

    let title = opts.title.trim();
    let mut w = PageWriter::new(title, &opts.fonts)?;

    w.gap(PAGE_HEIGHT / 4.0);
    w.text(title, Face::Bold, base * 2.4, 0.0, "");
    w.gap(BLOCK_GAP * 2.0);
    w.line(
        &format!("{} chapters", doc.chapter_count()),
        Face::Italic,
        base,
        0.0,
    );
    w.break_pending = true;

    for segment in &doc.segments {
        match segment {
            Segment::ChapterHeading { number, title } => {
                let title = strip_inline(title);
                if w.break_pending {
                    w.new_page();
                }
                w.bookmark(&format!("{number}. {title}"));
                w.line(&format!("Chapter {number}"), Face::Italic, base * 1.2, 0.0);
                w.gap(BLOCK_GAP);
                w.text(&title, Face::Bold, base * 1.8, 0.0, "");
                w.gap(BLOCK_GAP * 2.0);
            }
            Segment::Block(block) => render_block(&mut w, block, base),
            Segment::ChapterBoundary => w.break_pending = true,
        }
    }

    let (bytes, pages) = w.finish()?;
    debug!(pages, bytes = bytes.len(), "rendered PDF");
    Ok(bytes)
}

fn render_block(w: &mut PageWriter, block: &ContentBlock, base: f32) {
    match block {
        ContentBlock::Heading { level, text } => {
            let size = base * (1.6 - 0.1 * f32::from(*level)).max(1.0);
            w.gap(BLOCK_GAP);
            w.text(&strip_inline(text), Face::Bold, size, 0.0, "");
        }
        ContentBlock::Paragraph(text) => {
            w.text(&strip_inline(text), Face::Regular, base, 0.0, "");
        }
        ContentBlock::List { ordered, items } => {
            for (i, item) in items.iter().enumerate() {
                let marker = if *ordered {
                    format!("{}. ", i + 1)
                } else {
                    "- ".to_string()
                };
                w.text(&strip_inline(item), Face::Regular, base, INDENT / 2.0, &marker);
            }
        }
        ContentBlock::Image { alt, .. } => {
            let alt = strip_inline(alt);
            let label = if alt.trim().is_empty() {
                "[Image]".to_string()
            } else {
                format!("[Image: {alt}]")
            };
            w.text(&label, Face::Italic, base, 0.0, "");
        }
        ContentBlock::Blockquote(text) => {
            w.text(&strip_inline(text), Face::Italic, base, INDENT, "");
        }
        ContentBlock::CodeBlock(text) => {
            let size = base * 0.9;
            let max = max_chars(TEXT_WIDTH - INDENT / 2.0, Face::Mono, size);
            for line in text.lines() {
                let line = line.replace('\t', "    ");
                for chunk in hard_wrap(&line, max) {
                    w.line(&chunk, Face::Mono, size, INDENT / 2.0);
                }
            }
        }
    }
    w.gap(BLOCK_GAP);
}

/// Write the finished bytes through a sibling temp file so a failed write
/// never leaves a partial PDF at `path`.
pub fn write_pdf(path: &Path, bytes: &[u8]) -> Result<(), BookError> {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = Path::new(&part);

    let result = fs::write(part, bytes).and_then(|()| fs::rename(part, path));
    if let Err(e) = result {
        let _ = fs::remove_file(part);
        return Err(BookError::RenderFailed(format!(
            "cannot write {}: {e}",
            path.display()
        )));
    }
    Ok(())
}

fn render_err(e: printpdf::Error) -> BookError {
    BookError::RenderFailed(e.to_string())
}

fn chars_width(chars: usize, face: Face, size: f32) -> f32 {
    chars as f32 * size * face.width_factor() * PT_TO_MM
}

fn max_chars(width: f32, face: Face, size: f32) -> usize {
    ((width / (size * face.width_factor() * PT_TO_MM)) as usize).max(1)
}

fn first_existing(candidates: &[&str]) -> Option<PathBuf> {
    candidates.iter().map(PathBuf::from).find(|p| p.is_file())
}

/// `DejaVuSans.ttf` -> `DejaVuSans-Bold.ttf`,
/// `LiberationSans-Regular.ttf` -> `LiberationSans-Italic.ttf`.
fn sibling_font(regular: &Path, styles: &[&str]) -> Option<PathBuf> {
    let stem = regular.file_stem()?.to_str()?;
    let ext = regular.extension()?.to_str()?;
    let base = stem.strip_suffix("-Regular").unwrap_or(stem);
    styles
        .iter()
        .map(|style| regular.with_file_name(format!("{base}-{style}.{ext}")))
        .find(|p| p.is_file())
}

/// Text as the face can show it: embedded faces take any character but
/// controls, built-in faces get the ASCII rendition.
fn face_text(text: &str, unicode: bool) -> String {
    if !unicode {
        return to_pdf_text(text);
    }
    text.chars()
        .filter_map(|c| match c {
            '\t' => Some(' '),
            '\u{200B}' | '\u{FEFF}' | '\u{00AD}' => None,
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect()
}

/// The built-in fonts only cover ASCII reliably: common typographic
/// punctuation is transliterated, anything else becomes `?`.
fn to_pdf_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => out.push('"'),
            '\u{2010}'..='\u{2015}' | '\u{2212}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{00A0}' | '\u{2002}'..='\u{200A}' | '\t' => out.push(' '),
            '\u{200B}' | '\u{FEFF}' | '\u{00AD}' => {}
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

/// Greedy word wrap to at most `max` characters per line. Words longer than
/// a line are split.
fn wrap(text: &str, max: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        for piece in hard_wrap(word, max) {
            let len = current.chars().count();
            if len == 0 {
                current = piece;
            } else if len + 1 + piece.chars().count() <= max {
                current.push(' ');
                current.push_str(&piece);
            } else {
                lines.push(std::mem::replace(&mut current, piece));
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn hard_wrap(line: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(max.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::assemble;
    use crate::model::ExtractedDocument;

    fn opts() -> RenderOptions {
        RenderOptions {
            title: "The Lighthouse".into(),
            font_size: 11.0,
            fonts: FontSource::Builtin,
        }
    }

    fn chapter(title: &str, paragraphs: usize) -> ExtractedDocument {
        let mut blocks = vec![ContentBlock::heading(2, "Section")];
        for i in 0..paragraphs {
            blocks.push(ContentBlock::Paragraph(format!(
                "Paragraph {i} with *emphasis*, a [link](https://x.org) and \u{201C}quotes\u{201D}. {}",
                "Lorem ipsum dolor sit amet. ".repeat(8)
            )));
        }
        blocks.push(ContentBlock::List { ordered: true, items: vec!["one".into(), "two".into()] });
        blocks.push(ContentBlock::Image { alt: "Map".into(), src: "https://x.org/m.png".into() });
        blocks.push(ContentBlock::Blockquote("Quoted.".into()));
        blocks.push(ContentBlock::CodeBlock("fn main() {\n\tprintln!(\"hi\");\n}".into()));
        ExtractedDocument { title: title.into(), blocks }
    }

    #[test]
    fn produces_pdf_bytes() {
        let doc = assemble(vec![chapter("Intro", 2), chapter("The \u{2014} Storm", 40)]);
        let bytes = render_pdf(&doc, &opts()).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn empty_composite_still_renders_title_page() {
        let bytes = render_pdf(&CompositeDocument::default(), &opts()).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn bad_font_size_is_render_failed() {
        let o = RenderOptions { font_size: 0.0, ..opts() };
        let err = render_pdf(&CompositeDocument::default(), &o).unwrap_err();
        assert!(matches!(err, BookError::RenderFailed(_)));
    }

    #[test]
    fn transliterates_to_ascii() {
        assert_eq!(
            to_pdf_text("\u{201C}Hi\u{201D} \u{2014} it\u{2019}s\u{2026} caf\u{e9}"),
            "\"Hi\" - it's... caf?"
        );
    }

    #[test]
    fn embedded_faces_keep_non_ascii() {
        assert_eq!(face_text("caf\u{e9} \u{3a9}\u{3bc}\u{3ad}\u{3b3}\u{3b1}\t\u{200B}x", true), "caf\u{e9} \u{3a9}\u{3bc}\u{3ad}\u{3b3}\u{3b1} x");
        assert_eq!(face_text("caf\u{e9}", false), "caf?");
    }

    #[test]
    fn missing_font_file_is_render_failed() {
        let o = RenderOptions {
            fonts: FontSource::Files {
                regular: PathBuf::from("/no/such/font.ttf"),
                mono: None,
            },
            ..opts()
        };
        let err = render_pdf(&CompositeDocument::default(), &o).unwrap_err();
        assert!(matches!(err, BookError::RenderFailed(m) if m.contains("font.ttf")));
    }

    #[test]
    fn system_font_renders_non_latin_text() {
        let Some(regular) = first_existing(SYSTEM_SANS) else {
            return;
        };
        let (doc, _, _) = PdfDocument::new("t", Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let fonts = Fonts::load(&doc, &FontSource::System).unwrap();
        assert!(fonts.regular.unicode);

        let o = RenderOptions {
            fonts: FontSource::Files { regular, mono: None },
            ..opts()
        };
        let book = assemble(vec![ExtractedDocument {
            title: "\u{41a}\u{43d}\u{438}\u{433}\u{430}".into(),
            blocks: vec![ContentBlock::Paragraph("Caf\u{e9} \u{201C}na\u{ef}ve\u{201D} \u{3a9}".into())],
        }]);
        let bytes = render_pdf(&book, &o).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(bytes.windows(8).any(|w| w == b"FontFile"));
    }

    #[test]
    fn sibling_styles_found_next_to_regular() {
        let dir = tempfile::tempdir().unwrap();
        let regular = dir.path().join("Serif-Regular.ttf");
        fs::write(&regular, "x").unwrap();
        fs::write(dir.path().join("Serif-Italic.ttf"), "x").unwrap();
        assert_eq!(
            sibling_font(&regular, &["Oblique", "Italic"]),
            Some(dir.path().join("Serif-Italic.ttf"))
        );
        assert_eq!(sibling_font(&regular, &["Bold"]), None);
    }

    #[test]
    fn wraps_greedily() {
        assert_eq!(wrap("aa bb cc dd", 5), vec!["aa bb", "cc dd"]);
        assert_eq!(wrap("abcdefgh x", 3), vec!["abc", "def", "gh", "x"]);
        assert!(wrap("   ", 10).is_empty());
    }

    #[test]
    fn write_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("book.pdf");
        write_pdf(&out, b"%PDF-1.3 test").unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"%PDF-1.3 test");
        assert!(!dir.path().join("book.pdf.part").exists());

        let missing = dir.path().join("no-such-dir").join("book.pdf");
        assert!(matches!(write_pdf(&missing, b"x"), Err(BookError::RenderFailed(_))));
        assert!(!missing.exists());
    }
}
