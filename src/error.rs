use std::path::PathBuf;

use thiserror::Error;

/// Failures the pipeline reports by name. Per-chapter variants are recovered
/// by the download stage; the rest end the stage that raised them.
#[derive(Debug, Error)]
pub enum BookError {
    #[error("no chapter links found on {url}")]
    NoChaptersFound { url: String },

    #[error("failed to fetch {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("extracted content too thin ({chars} chars, need {min})")]
    ExtractionTooThin { chars: usize, min: usize },

    #[error("content extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("no readable chapter files in {}", dir.display())]
    NoValidChapters { dir: PathBuf },

    #[error("failed to render PDF: {0}")]
    RenderFailed(String),
}

impl BookError {
    /// True for failures that only cost one chapter, not the whole stage.
    pub fn is_per_chapter(&self) -> bool {
        matches!(
            self,
            BookError::FetchFailed { .. }
                | BookError::ExtractionTooThin { .. }
                | BookError::ExtractionFailed(_)
        )
    }
}
