//! datareel - download media with yt-dlp from your terminal
//!
//! Thin presentation layer over the datareel engine: one job per invocation,
//! rendered as a progress bar.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use dialoguer::{Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use datareel::core::metadata::{BEST_QUALITY, fetch_thumbnail};
use datareel::storage::config;
use datareel::types::{DownloadOptions, TimeRange, VideoMetadata};
use datareel::utils::paths::ensure_dir;
use datareel::utils::text::format_speed;
use datareel::{DownloadStatus, Engine, JobId, JobUpdate, UpdateKind};

/// How long Ctrl-C waits for the tool to exit before giving up on it
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Download media with yt-dlp, with progress, pause and cancel.
#[derive(Parser, Debug)]
#[command(name = "datareel")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a URL
    Download(DownloadArgs),
    /// Show metadata and available qualities for a URL
    Info {
        url: String,

        /// Save the thumbnail image to this path
        #[arg(long, value_name = "PATH")]
        thumbnail: Option<PathBuf>,
    },
    /// Show whether yt-dlp is installed and its version
    Version,
    /// Update yt-dlp in place
    Update,
}

#[derive(Args, Debug)]
struct DownloadArgs {
    url: String,

    /// Output directory (defaults to the configured download directory)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Extract audio only
    #[arg(short, long)]
    audio_only: bool,

    /// Download and embed subtitles
    #[arg(long)]
    subs: bool,

    #[arg(long)]
    embed_thumbnail: bool,

    /// Download the whole playlist
    #[arg(long)]
    playlist: bool,

    /// Stop after this many playlist items
    #[arg(long, requires = "playlist")]
    max_downloads: Option<u32>,

    /// Section start, e.g. 00:01:00
    #[arg(long)]
    start: Option<String>,

    /// Section end (defaults to the end of the media)
    #[arg(long, requires = "start")]
    end: Option<String>,

    /// yt-dlp format selector
    #[arg(short, long, conflicts_with = "pick_format")]
    format: Option<String>,

    /// Output filename template
    #[arg(long)]
    template: Option<String>,

    /// Choose a quality interactively from the fetched metadata
    #[arg(long)]
    pick_format: bool,
}

impl DownloadArgs {
    fn options(&self) -> DownloadOptions {
        DownloadOptions {
            audio_only: self.audio_only,
            subtitles: self.subs,
            embed_thumbnail: self.embed_thumbnail,
            playlist: self.playlist,
            max_downloads: self.max_downloads,
            time_range: self.start.clone().map(|start| TimeRange {
                start,
                end: self.end.clone(),
            }),
            custom_format: self.format.clone(),
            output_template: self.template.clone(),
        }
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("datareel=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let cfg = config::load_config()?;
    let mut engine = Engine::new(cfg);

    match cli.command {
        Command::Download(args) => download(&mut engine, args).await,
        Command::Info { url, thumbnail } => info(&engine, &url, thumbnail).await,
        Command::Version => version(&engine).await,
        Command::Update => update(&engine).await,
    }
}

async fn download(engine: &mut Engine, args: DownloadArgs) -> anyhow::Result<()> {
    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| engine.config().download_dir.clone());
    ensure_dir(&output_dir)
        .await
        .with_context(|| format!("Cannot create {}", output_dir.display()))?;

    let mut options = args.options();
    if args.pick_format {
        println!("{}", "Fetching formats...".dimmed());
        let metadata = engine.preview(&args.url).await?;
        options.custom_format = pick_format(&metadata)?;
    }

    let id = engine.create(&args.url, &output_dir, options)?;
    engine.start(id)?;

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% | {msg}")?
            .progress_chars("=> "),
    );
    bar.set_message("starting");
    bar.enable_steady_tick(Duration::from_millis(100));

    let status = drive(engine, id, &bar).await?;
    bar.finish_and_clear();

    let snapshot = engine.snapshot(id)?;
    match status {
        DownloadStatus::Completed => println!("{} {}", "✓".green(), "Download complete!".green()),
        DownloadStatus::Cancelled => println!("{}", "Download cancelled".yellow()),
        _ => {
            let message = snapshot.error.unwrap_or_else(|| "Download failed".into());
            anyhow::bail!(message);
        }
    }
    Ok(())
}

enum Step {
    Update(JobUpdate),
    Interrupted,
}

/// Pump engine updates into the bar until the job settles. Ctrl-C cancels the
/// job and waits for the exit to be reaped.
async fn drive(
    engine: &mut Engine,
    id: JobId,
    bar: &ProgressBar,
) -> anyhow::Result<DownloadStatus> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let step = tokio::select! {
            update = engine.next_update() => Step::Update(update),
            _ = &mut ctrl_c => Step::Interrupted,
        };

        match step {
            Step::Interrupted => {
                bar.set_message("cancelling");
                engine.cancel(id)?;
                if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_finished(engine, id))
                    .await
                    .is_err()
                {
                    tracing::warn!("yt-dlp did not exit in time");
                }
                return Ok(engine.snapshot(id)?.status);
            }
            Step::Update(JobUpdate { job, kind }) if job == id => match kind {
                UpdateKind::Progress => {
                    let snapshot = engine.snapshot(id)?;
                    bar.set_position(snapshot.progress as u64);
                    let eta = snapshot.eta.as_deref().unwrap_or("--:--");
                    bar.set_message(format!("{} | ETA {}", format_speed(snapshot.speed), eta));
                }
                UpdateKind::Finished(status) => {
                    bar.set_position(engine.snapshot(id)?.progress as u64);
                    return Ok(status);
                }
                _ => {}
            },
            Step::Update(_) => {}
        }
    }
}

async fn wait_finished(engine: &mut Engine, id: JobId) {
    loop {
        let update = engine.next_update().await;
        if update.job == id && matches!(update.kind, UpdateKind::Finished(_)) {
            return;
        }
    }
}

/// Let the user choose one of the quality options. `None` means best.
fn pick_format(metadata: &VideoMetadata) -> anyhow::Result<Option<String>> {
    if metadata.available_qualities.is_empty() {
        println!("{}", "No formats reported, using best quality".yellow());
        return Ok(None);
    }

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select quality")
        .items(&metadata.available_qualities)
        .default(0)
        .interact_opt()?;

    Ok(selection
        .and_then(|index| metadata.format_for_choice(index))
        .map(|format| format.format_id.clone()))
}

async fn info(engine: &Engine, url: &str, thumbnail: Option<PathBuf>) -> anyhow::Result<()> {
    println!("{}", "Fetching info...".dimmed());
    let metadata = engine.preview(url).await?;

    let field = |label: &str, value: Option<&str>| {
        if let Some(value) = value {
            println!("{:>10} {}", label.dimmed(), value);
        }
    };
    field("Title", metadata.title.as_deref());
    field("Uploader", metadata.uploader.as_deref());
    field("Duration", metadata.duration.as_deref());
    field("Thumbnail", metadata.thumbnail_url.as_deref());

    if !metadata.available_qualities.is_empty() {
        println!("\n{}", "Qualities:".bold());
        for (index, label) in metadata.available_qualities.iter().enumerate() {
            if label == BEST_QUALITY {
                println!("  {:>3}. {}", index, label.green());
            } else {
                println!("  {:>3}. {}", index, label);
            }
        }
    }

    if let Some(path) = thumbnail {
        let Some(thumbnail_url) = metadata.thumbnail_url.as_deref() else {
            anyhow::bail!("No thumbnail reported for {}", url);
        };
        let bytes = fetch_thumbnail(&reqwest::Client::new(), thumbnail_url).await?;
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Cannot write {}", path.display()))?;
        println!("{} Thumbnail saved to {}", "✓".green(), path.display());
    }
    Ok(())
}

async fn version(engine: &Engine) -> anyhow::Result<()> {
    let downloader = engine.downloader(Default::default())?;
    let tool = downloader.tool_info().await?;

    println!("datareel {}", env!("CARGO_PKG_VERSION"));
    if tool.installed {
        println!(
            "{} {} ({})",
            "✓".green(),
            tool.version.as_deref().unwrap_or("unknown version"),
            tool.path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        );
    } else {
        println!(
            "{} {} not found. Install it with: pip install yt-dlp",
            "✗".red(),
            downloader.program().display()
        );
    }
    Ok(())
}

async fn update(engine: &Engine) -> anyhow::Result<()> {
    let downloader = engine.downloader(Default::default())?;
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message(format!("Updating {}...", downloader.program().display()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = downloader.update().await;
    spinner.finish_and_clear();
    result?;

    println!("{} {}", "✓".green(), "yt-dlp is up to date".green());
    Ok(())
}
