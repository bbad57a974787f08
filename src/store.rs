//! On-disk hand-off between stages: the link list, one Markdown file per
//! chapter, and a JSON manifest of the download run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::{title_from_url, ChapterLink};

pub const MANIFEST_FILE: &str = "manifest.json";

static CHAPTER_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^chapter-(\d+)\.md$").unwrap());

// ── Link list ──

/// One `<title>\t<url>` line per link, preceded by a `# source:` comment.
pub fn write_links(path: &Path, source: &Url, links: &[ChapterLink]) -> Result<()> {
    let mut out = format!("# source: {source}\n");
    for link in links {
        let title: String = link
            .title
            .chars()
            .map(|c| if c == '\t' || c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        out.push_str(&format!("{}\t{}\n", title.trim(), link.url));
    }
    fs::write(path, out).with_context(|| format!("Failed to write {}", path.display()))
}

/// Read a link list. Lines without a tab are bare URLs; blank lines and `#`
/// comments are skipped.
pub fn read_links(path: &Path) -> Result<Vec<ChapterLink>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let mut links = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        // A tab means a title, even one that starts with `#`.
        if line.is_empty() || (line.starts_with('#') && !line.contains('\t')) {
            continue;
        }
        let (title, raw_url) = match line.rsplit_once('\t') {
            Some((title, url)) => (title.trim(), url.trim()),
            None => ("", line),
        };
        let url = Url::parse(raw_url)
            .with_context(|| format!("{}:{}: invalid URL {raw_url:?}", path.display(), n + 1))?;
        let title = if title.is_empty() {
            title_from_url(&url).unwrap_or_else(|| url.to_string())
        } else {
            title.to_string()
        };
        links.push(ChapterLink::new(title, url));
    }
    Ok(links)
}

// ── Chapter files ──

pub fn chapter_file_name(index: usize) -> String {
    format!("chapter-{index:04}.md")
}

pub fn write_chapter(dir: &Path, index: usize, text: &str) -> Result<PathBuf> {
    let path = dir.join(chapter_file_name(index));
    fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// `chapter-N.md` files in `dir`, ordered by N (`chapter-2` before
/// `chapter-10`), then by name.
pub fn list_chapter_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;

    let mut files: Vec<(u64, String, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(number) = CHAPTER_FILE_RE
            .captures(&name)
            .and_then(|c| c[1].parse::<u64>().ok())
        else {
            continue;
        };
        if entry.file_type()?.is_file() {
            files.push((number, name, entry.path()));
        }
    }
    files.sort();
    Ok(files.into_iter().map(|(_, _, path)| path).collect())
}

/// Remove every `chapter-N.md` in `dir`, so a new download never mixes with
/// chapters left by an earlier run. Returns how many were removed.
pub fn clear_chapter_files(dir: &Path) -> Result<usize> {
    let files = list_chapter_files(dir)?;
    for path in &files {
        fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(files.len())
}

// ── Manifest ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// 1-based position in the link list.
    pub index: usize,
    pub title: String,
    pub url: String,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            started: now,
            finished: now,
            entries: Vec::new(),
        }
    }

    pub fn record_ok(&mut self, index: usize, link: &ChapterLink, file: &Path) {
        self.entries.push(ManifestEntry {
            index,
            title: link.title.clone(),
            url: link.url.to_string(),
            status: EntryStatus::Ok,
            file: file.file_name().map(|f| f.to_string_lossy().into_owned()),
            error: None,
            timestamp: Utc::now(),
        });
    }

    pub fn record_failed(&mut self, index: usize, link: &ChapterLink, error: &str) {
        self.entries.push(ManifestEntry {
            index,
            title: link.title.clone(),
            url: link.url.to_string(),
            status: EntryStatus::Failed,
            file: None,
            error: Some(error.to_string()),
            timestamp: Utc::now(),
        });
    }
}

pub fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<PathBuf> {
    let path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
