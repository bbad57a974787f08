use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use url::Url;

use crate::assemble::assemble;
use crate::error::BookError;
use crate::extract::{extract_document, ExtractOptions};
use crate::fetch::Fetcher;
use crate::links::extract_links_from_html;
use crate::markup;
use crate::model::{ChapterLink, ExtractedDocument};
use crate::render::{render_pdf, write_pdf, RenderOptions};
use crate::store::{self, Manifest};

/// Link list written by `run` next to the chapter files.
pub const LINKS_FILE: &str = "chapters.txt";

#[derive(Debug)]
pub struct DownloadStats {
    pub total: usize,
    pub ok: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct CombineStats {
    pub files: usize,
    pub chapters: usize,
    pub skipped: usize,
    pub bytes: usize,
}

/// Stage 1: fetch the listing page and pick out its chapter links.
pub async fn discover(fetcher: &mut Fetcher, url: &Url) -> Result<Vec<ChapterLink>> {
    info!("Fetching listing page: {}", url);
    let page = fetcher.fetch(url).await?;
    if page.url != *url {
        debug!(from = %url, to = %page.url, "listing redirected");
    }

    let links = extract_links_from_html(&page.body, &page.url)?;
    info!("Found {} chapter links", links.len());
    Ok(links)
}

/// Stage 2: fetch and extract each chapter in order, one file per success.
/// Chapters that fail are logged, recorded in the manifest and skipped.
pub async fn download(
    fetcher: &mut Fetcher,
    links: &[ChapterLink],
    out_dir: &Path,
    opts: &ExtractOptions,
    limit: Option<usize>,
) -> Result<DownloadStats> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let stale = store::clear_chapter_files(out_dir)?;
    if stale > 0 {
        info!("Removed {} chapter files from an earlier run", stale);
    }

    let links = &links[..limit.unwrap_or(links.len()).min(links.len())];
    let total = links.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({eta}) {msg}")?
            .progress_chars("=> "),
    );

    let mut manifest = Manifest::new();
    let mut ok = 0usize;
    let mut failed = 0usize;

    for (i, link) in links.iter().enumerate() {
        let index = i + 1;
        pb.set_message(link.title.clone());

        match fetch_chapter(fetcher, link, opts).await {
            Ok(doc) => {
                let path = store::write_chapter(out_dir, index, &markup::render(&doc))?;
                debug!(index, chars = doc.text_len(), file = %path.display(), "saved chapter");
                manifest.record_ok(index, link, &path);
                ok += 1;
            }
            Err(e) if e.is_per_chapter() => {
                warn!("Skipping chapter {} ({}): {}", index, link.url, e);
                manifest.record_failed(index, link, &e.to_string());
                failed += 1;
            }
            Err(e) => return Err(e.into()),
        }
        pb.inc(1);
    }

    manifest.finished = chrono::Utc::now();
    store::write_manifest(out_dir, &manifest)?;

    pb.finish_and_clear();
    info!("Downloaded {} chapters ({} ok, {} skipped)", total, ok, failed);

    Ok(DownloadStats { total, ok, failed })
}

async fn fetch_chapter(
    fetcher: &mut Fetcher,
    link: &ChapterLink,
    opts: &ExtractOptions,
) -> Result<ExtractedDocument, BookError> {
    let page = fetcher.fetch(&link.url).await?;
    extract_document(&page.body, &page.url, &link.title, opts)
}

/// Stage 3: read the chapter files back in order and bind them into one PDF.
pub fn combine(dir: &Path, output: &Path, opts: &RenderOptions) -> Result<CombineStats> {
    let files = store::list_chapter_files(dir)?;
    info!("Reading {} chapter files from {}", files.len(), dir.display());

    let mut documents = Vec::new();
    let mut skipped = 0usize;
    for path in &files {
        match read_chapter(path) {
            Ok(Some(doc)) => documents.push(doc),
            Ok(None) => {
                warn!("Skipping empty chapter file {}", path.display());
                skipped += 1;
            }
            Err(e) => {
                warn!("Skipping unreadable chapter file {}: {:#}", path.display(), e);
                skipped += 1;
            }
        }
    }

    if documents.is_empty() {
        return Err(BookError::NoValidChapters {
            dir: dir.to_path_buf(),
        }
        .into());
    }

    let composite = assemble(documents);
    for ch in &composite.chapters {
        debug!(number = ch.number, title = %ch.document.title, blocks = ch.document.blocks.len(), "chapter");
    }
    let bytes = render_pdf(&composite, opts)?;
    write_pdf(output, &bytes)?;
    info!("Wrote {} ({} chapters)", output.display(), composite.chapter_count());

    Ok(CombineStats {
        files: files.len(),
        chapters: composite.chapter_count(),
        skipped,
        bytes: bytes.len(),
    })
}

fn read_chapter(path: &Path) -> Result<Option<ExtractedDocument>> {
    let text = fs::read_to_string(path)?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let doc = markup::parse(&text, &stem);
    Ok((!doc.blocks.is_empty()).then_some(doc))
}

/// All three stages; the link list is kept in `work_dir` for later runs.
pub async fn run(
    fetcher: &mut Fetcher,
    url: &Url,
    work_dir: &Path,
    output: &Path,
    extract: &ExtractOptions,
    render: &RenderOptions,
    limit: Option<usize>,
) -> Result<(DownloadStats, CombineStats)> {
    let links = discover(fetcher, url).await?;

    fs::create_dir_all(work_dir)
        .with_context(|| format!("Failed to create {}", work_dir.display()))?;
    store::write_links(&work_dir.join(LINKS_FILE), url, &links)?;

    let downloaded = download(fetcher, &links, work_dir, extract, limit).await?;
    let combined = combine(work_dir, output, render)?;
    Ok((downloaded, combined))
}

/// `--title`, else the output file's stem.
pub fn book_title(title: Option<String>, output: &Path) -> String {
    title
        .filter(|t| !t.trim().is_empty())
        .or_else(|| {
            output
                .file_stem()
                .map(|s| s.to_string_lossy().replace(['-', '_'], " "))
        })
        .unwrap_or_else(|| "Book".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::Segment;
    use crate::config::Settings;
    use crate::model::ContentBlock;
    use crate::render::FontSource;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve fixed pages on a local port: `path -> html`, anything else 404.
    async fn serve(pages: Vec<(&'static str, String)>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                let pages = pages.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&request);
                    let path = request.split_whitespace().nth(1).unwrap_or("/");
                    let (status, body) = match pages.iter().find(|(p, _)| *p == path) {
                        Some((_, html)) => ("200 OK", html.clone()),
                        None => ("404 Not Found", String::new()),
                    };
                    let response = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn no_delay() -> Settings {
        Settings {
            delay_ms: 0,
            timeout_secs: 5,
            ..Settings::default()
        }
    }

    fn render_opts() -> RenderOptions {
        RenderOptions {
            title: "Test Book".into(),
            font_size: 11.0,
            fonts: FontSource::Builtin,
        }
    }

    fn chapter(title: &str) -> String {
        markup::render(&ExtractedDocument {
            title: title.into(),
            blocks: vec![ContentBlock::Paragraph(format!("Body of {title}."))],
        })
    }

    #[test]
    fn combine_reads_files_in_order_and_skips_empty() {
        let dir = tempfile::tempdir().unwrap();
        // chapter-0002 was too thin and never written.
        fs::write(dir.path().join("chapter-0001.md"), chapter("One")).unwrap();
        fs::write(dir.path().join("chapter-0003.md"), chapter("Three")).unwrap();
        fs::write(dir.path().join("chapter-0004.md"), "# Only a title\n").unwrap();
        fs::write(dir.path().join("manifest.json"), "{}").unwrap();

        let out = dir.path().join("book.pdf");
        let stats = combine(dir.path(), &out, &render_opts()).unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.chapters, 2);
        assert_eq!(stats.skipped, 1);
        assert!(fs::read(&out).unwrap().starts_with(b"%PDF"));
        assert_eq!(fs::metadata(&out).unwrap().len() as usize, stats.bytes);
    }

    #[test]
    fn combine_with_nothing_readable_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("chapter-0001.md"), "").unwrap();
        let out = dir.path().join("book.pdf");

        let err = combine(dir.path(), &out, &render_opts()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BookError>(),
            Some(BookError::NoValidChapters { .. })
        ));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn failed_chapters_are_recorded_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            delay_ms: 0,
            timeout_secs: 2,
            ..Settings::default()
        };
        let mut fetcher = Fetcher::new(&settings).unwrap();
        let links = vec![
            ChapterLink::new("One", Url::parse("http://127.0.0.1:9/c/1").unwrap()),
            ChapterLink::new("Two", Url::parse("http://127.0.0.1:9/c/2").unwrap()),
            ChapterLink::new("Three", Url::parse("http://127.0.0.1:9/c/3").unwrap()),
        ];

        let stats = download(
            &mut fetcher,
            &links,
            dir.path(),
            &settings.extract_options(),
            Some(2),
        )
        .await
        .unwrap();
        assert_eq!((stats.total, stats.ok, stats.failed), (2, 0, 2));
        assert!(store::list_chapter_files(dir.path()).unwrap().is_empty());

        let manifest: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join(store::MANIFEST_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest["entries"].as_array().unwrap().len(), 2);
        assert_eq!(manifest["entries"][1]["status"], "failed");
    }

    #[tokio::test]
    async fn thin_chapter_skipped_and_neighbours_numbered() {
        let chapter = std::fs::read_to_string("tests/fixtures/chapter.html").unwrap();
        let thin = std::fs::read_to_string("tests/fixtures/chapter_thin.html").unwrap();
        let base = serve(vec![
            ("/c/1", chapter.clone()),
            ("/c/2", thin),
            ("/c/3", chapter.replace("Chapter 1: The Storm", "Chapter 3: The Calm")),
        ])
        .await;
        let links: Vec<ChapterLink> = ["c/1", "c/2", "c/3"]
            .iter()
            .map(|p| ChapterLink::new(*p, base.join(p).unwrap()))
            .collect();

        let dir = tempfile::tempdir().unwrap();
        let settings = no_delay();
        let mut fetcher = Fetcher::new(&settings).unwrap();
        let stats = download(&mut fetcher, &links, dir.path(), &settings.extract_options(), None)
            .await
            .unwrap();
        assert_eq!((stats.total, stats.ok, stats.failed), (3, 2, 1));

        let files = store::list_chapter_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["chapter-0001.md", "chapter-0003.md"]);

        let docs: Vec<ExtractedDocument> = files
            .iter()
            .map(|p| read_chapter(p).unwrap().unwrap())
            .collect();
        let composite = assemble(docs);
        let headings: Vec<(usize, String)> = composite
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::ChapterHeading { number, title } => Some((*number, title.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            headings,
            vec![
                (1, "Chapter 1: The Storm".to_string()),
                (2, "Chapter 3: The Calm".to_string()),
            ]
        );

        let out = dir.path().join("book.pdf");
        let combined = combine(dir.path(), &out, &render_opts()).unwrap();
        assert_eq!(combined.chapters, 2);
        assert!(std::fs::read(&out).unwrap().starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn stale_chapter_files_never_reach_the_book() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("chapter-0002.md"), chapter("Old Book")).unwrap();

        let base = serve(Vec::new()).await;
        let links = vec![
            ChapterLink::new("One", base.join("c/1").unwrap()),
            ChapterLink::new("Two", base.join("c/2").unwrap()),
        ];
        let settings = no_delay();
        let mut fetcher = Fetcher::new(&settings).unwrap();
        let stats = download(&mut fetcher, &links, dir.path(), &settings.extract_options(), None)
            .await
            .unwrap();
        assert_eq!((stats.ok, stats.failed), (0, 2));
        assert!(store::list_chapter_files(dir.path()).unwrap().is_empty());

        let err = combine(dir.path(), &dir.path().join("book.pdf"), &render_opts()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BookError>(),
            Some(BookError::NoValidChapters { .. })
        ));
    }

    #[test]
    fn title_defaults_to_output_stem() {
        let out = Path::new("out/my-book.pdf");
        assert_eq!(book_title(None, out), "my book");
        assert_eq!(book_title(Some("  ".into()), out), "my book");
        assert_eq!(book_title(Some("Given".into()), out), "Given");
    }
}
