mod assemble;
mod config;
mod error;
mod extract;
mod fetch;
mod html;
mod links;
mod markup;
mod model;
mod pipeline;
mod render;
mod store;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use url::Url;

use crate::config::Settings;
use crate::fetch::Fetcher;
use crate::render::RenderOptions;

#[derive(Parser)]
#[command(name = "book2pdf", about = "Scrape a web book's chapters and bind them into one PDF")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find chapter links on a table-of-contents page
    Links {
        /// Listing page URL
        url: Url,
        /// Where to write the link list
        #[arg(short, long, default_value = "chapters.txt")]
        output: PathBuf,
    },
    /// Download and extract every chapter in a link list
    Fetch {
        /// Link list written by `links` (or one URL per line)
        chapters: PathBuf,
        /// Directory for the chapter files
        #[arg(short, long, default_value = "chapters")]
        dir: PathBuf,
        /// Max chapters to download (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Bind downloaded chapter files into a PDF
    Combine {
        /// Directory holding chapter-NNNN.md files
        dir: PathBuf,
        /// Output PDF
        output: PathBuf,
        /// Book title (default: output file name)
        #[arg(long)]
        title: Option<String>,
    },
    /// links + fetch + combine in one go
    Run {
        /// Listing page URL
        url: Url,
        /// Output PDF
        output: PathBuf,
        /// Directory for the link list and chapter files
        #[arg(short, long, default_value = "chapters")]
        dir: PathBuf,
        /// Max chapters to download (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Book title (default: output file name)
        #[arg(long)]
        title: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Links { url, output } => {
            let mut fetcher = Fetcher::new(&settings)?;
            let links = pipeline::discover(&mut fetcher, &url).await?;
            store::write_links(&output, &url, &links)?;
            for (i, link) in links.iter().take(5).enumerate() {
                println!("{:>4}. {}", i + 1, truncate(&link.title, 60));
            }
            if links.len() > 5 {
                println!("      ... and {} more", links.len() - 5);
            }
            println!("Saved {} chapter links to {}", links.len(), output.display());
            Ok(())
        }
        Commands::Fetch { chapters, dir, limit } => {
            let links = store::read_links(&chapters)?;
            if links.is_empty() {
                println!("No links in {}. Run 'links' first.", chapters.display());
                return Ok(());
            }
            let count = limit.unwrap_or(links.len()).min(links.len());
            println!("Downloading {} chapters to {}...", count, dir.display());
            let mut fetcher = Fetcher::new(&settings)?;
            let stats = pipeline::download(
                &mut fetcher,
                &links,
                &dir,
                &settings.extract_options(),
                limit,
            )
            .await?;
            println!(
                "Done: {} chapters ({} saved, {} skipped).",
                stats.total, stats.ok, stats.failed
            );
            Ok(())
        }
        Commands::Combine { dir, output, title } => {
            let opts = render_options(&settings, title, &output);
            let stats = pipeline::combine(&dir, &output, &opts)
                .with_context(|| format!("Failed to build {}", output.display()))?;
            print_combined(&stats, &output);
            Ok(())
        }
        Commands::Run {
            url,
            output,
            dir,
            limit,
            title,
        } => {
            let opts = render_options(&settings, title, &output);
            let mut fetcher = Fetcher::new(&settings)?;

            let t_run = Instant::now();
            let (downloaded, combined) = pipeline::run(
                &mut fetcher,
                &url,
                &dir,
                &output,
                &settings.extract_options(),
                &opts,
                limit,
            )
            .await?;
            println!(
                "Downloaded {} chapters ({} saved, {} skipped) in {:.1}s",
                downloaded.total,
                downloaded.ok,
                downloaded.failed,
                t_run.elapsed().as_secs_f64()
            );
            print_combined(&combined, &output);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn render_options(settings: &Settings, title: Option<String>, output: &Path) -> RenderOptions {
    RenderOptions {
        title: pipeline::book_title(title, output),
        font_size: settings.font_size,
        fonts: settings.font_source(),
    }
}

fn print_combined(stats: &pipeline::CombineStats, output: &Path) {
    println!(
        "Wrote {} ({} chapters from {} files, {} skipped, {} KB).",
        output.display(),
        stats.chapters,
        stats.files,
        stats.skipped,
        stats.bytes / 1024
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
