use std::path::PathBuf;

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder};
use serde::Deserialize;

use crate::extract::{ExtractOptions, DEFAULT_MIN_CONTENT_CHARS};
use crate::render::FontSource;

/// Optional settings file in the working directory (any format `config`
/// understands: `book2pdf.toml`, `book2pdf.json`, ...).
const CONFIG_FILE: &str = "book2pdf";
/// Environment overrides: `BOOK2PDF_DELAY_MS=2000`.
const ENV_PREFIX: &str = "BOOK2PDF";

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Minimum pause between two requests.
    pub delay_ms: u64,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub min_content_chars: usize,
    /// Body text size in the PDF, in points.
    pub font_size: f32,
    /// TrueType file for body text; bold and italic siblings are picked up.
    pub font_path: Option<PathBuf>,
    pub mono_font_path: Option<PathBuf>,
    /// Skip font embedding and use the PDF built-in fonts.
    pub builtin_fonts: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            min_content_chars: DEFAULT_MIN_CONTENT_CHARS,
            font_size: 11.0,
            font_path: None,
            mono_font_path: None,
            builtin_fonts: false,
        }
    }
}

impl Settings {
    /// Defaults, then `book2pdf.*` if present, then `BOOK2PDF_*` variables.
    pub fn load() -> Result<Self> {
        let builder = Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX));
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        builder
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")
    }

    pub fn font_source(&self) -> FontSource {
        if self.builtin_fonts {
            return FontSource::Builtin;
        }
        match &self.font_path {
            Some(regular) => FontSource::Files {
                regular: regular.clone(),
                mono: self.mono_font_path.clone(),
            },
            None => FontSource::System,
        }
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            min_content_chars: self.min_content_chars,
        }
    }
}
