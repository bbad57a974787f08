use crate::model::{ContentBlock, ExtractedDocument, MAX_HEADING_LEVEL};

/// Heading level of a chapter title in the composite.
pub const CHAPTER_LEVEL: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    /// 1-based, contiguous in output order.
    pub number: usize,
    pub document: ExtractedDocument,
}

/// One step of the composite's flow, in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    ChapterHeading { number: usize, title: String },
    Block(ContentBlock),
    /// End of a chapter; the pagination layer starts a new page here.
    ChapterBoundary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeDocument {
    pub chapters: Vec<Chapter>,
    pub segments: Vec<Segment>,
}

impl CompositeDocument {
    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }
}

/// Fold extracted chapters, in link order, into one document.
pub fn assemble(documents: Vec<ExtractedDocument>) -> CompositeDocument {
    let mut composite = CompositeDocument::default();

    for (i, doc) in documents.into_iter().enumerate() {
        let number = i + 1;
        let doc = demote_headings(doc);

        composite.segments.push(Segment::ChapterHeading {
            number,
            title: doc.title.clone(),
        });
        composite
            .segments
            .extend(doc.blocks.iter().cloned().map(Segment::Block));
        composite.segments.push(Segment::ChapterBoundary);

        composite.chapters.push(Chapter {
            number,
            document: doc,
        });
    }

    composite
}

/// Push every heading one level down so the chapter title stays the only
/// top-level heading of its section.
fn demote_headings(mut doc: ExtractedDocument) -> ExtractedDocument {
    for block in &mut doc.blocks {
        if let ContentBlock::Heading { level, .. } = block {
            *level = (*level + CHAPTER_LEVEL).min(MAX_HEADING_LEVEL);
        }
    }
    doc
}
