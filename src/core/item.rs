//! Download item state machine
//!
//! ```text
//! Idle ─▶ Queued ─▶ Downloading ─▶ Completed | Failed | Cancelled
//!                    │      ▲                      │
//!                    ▼      │                      │ retry
//!                    Paused ┘          Idle ◀──────┘
//! ```

use crate::core::downloader::Downloader;
use crate::core::parser::{LineBuffer, ProgressUpdate, parse_progress_line};
use crate::core::process::{self, ExitOutcome, ProcessEvent, ProcessHandle, Signal};
use crate::error::{DataReelError, Result};
use crate::types::{
    DownloadOptions, DownloadStatus, DownloaderKind, ItemSnapshot, JobId, VideoMetadata,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// URL schemes the tool is asked to fetch
const ALLOWED_SCHEMES: &[&str] = &["http", "https", "ftp"];

/// Check that a URL is non-empty, parses, and uses a supported scheme.
pub fn validate_url(url_str: &str) -> Result<()> {
    if url_str.trim().is_empty() {
        return Err(DataReelError::InvalidUrl("URL is empty".into()));
    }
    let url = url::Url::parse(url_str)
        .map_err(|e| DataReelError::InvalidUrl(format!("{}: {}", url_str, e)))?;
    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(DataReelError::InvalidUrl(format!(
            "unsupported scheme '{}': {}",
            url.scheme(),
            url_str
        )));
    }
    if url.host_str().is_none() {
        return Err(DataReelError::InvalidUrl(format!("URL must have a host: {}", url_str)));
    }
    Ok(())
}

/// Where a spawned process reports to
#[derive(Debug, Clone)]
pub struct SpawnContext {
    pub events: UnboundedSender<ProcessEvent>,
    pub reap_grace: Duration,
}

/// One unit of work: a URL, where it goes, how to fetch it, and what the
/// tool has reported so far.
#[derive(Debug)]
pub struct DownloadItem {
    id: JobId,
    url: String,
    output_dir: PathBuf,
    options: DownloadOptions,
    kind: DownloaderKind,
    metadata: Option<VideoMetadata>,
    status: DownloadStatus,
    progress: f64,
    speed: f64,
    eta: Option<String>,
    error: Option<String>,
    process: Option<ProcessHandle>,
    lines: LineBuffer,
    generation: u64,
}

impl DownloadItem {
    /// Create an idle item. Fails if the URL is empty or not http(s)/ftp.
    pub fn new(
        id: JobId,
        url: &str,
        output_dir: impl Into<PathBuf>,
        options: DownloadOptions,
        kind: DownloaderKind,
    ) -> Result<Self> {
        validate_url(url)?;
        Ok(Self {
            id,
            url: url.to_string(),
            output_dir: output_dir.into(),
            options,
            kind,
            metadata: None,
            status: DownloadStatus::Idle,
            progress: 0.0,
            speed: 0.0,
            eta: None,
            error: None,
            process: None,
            lines: LineBuffer::new(),
            generation: 0,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    pub fn kind(&self) -> DownloaderKind {
        self.kind
    }

    pub fn metadata(&self) -> Option<&VideoMetadata> {
        self.metadata.as_ref()
    }

    pub fn status(&self) -> DownloadStatus {
        self.status
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn eta(&self) -> Option<&str> {
        self.eta.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ProcessHandle::pid)
    }

    /// A child process is attached and not yet reaped.
    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            id: self.id,
            url: self.url.clone(),
            output_dir: self.output_dir.clone(),
            status: self.status,
            status_label: self.status.label().to_string(),
            progress: self.progress,
            speed: self.speed,
            eta: self.eta.clone(),
            error: self.error.clone(),
            pid: self.pid(),
            title: self.metadata.as_ref().and_then(|m| m.title.clone()),
            actions: self.status.actions(),
        }
    }

    // ============================================
    // Pre-execution transitions
    // ============================================

    /// Mark as waiting for a queue slot.
    pub fn mark_queued(&mut self) -> Result<()> {
        match self.status {
            DownloadStatus::Idle | DownloadStatus::FetchingInfo => {
                self.set_status(DownloadStatus::Queued);
                Ok(())
            }
            from => Err(DataReelError::InvalidTransition {
                from,
                action: "queue",
            }),
        }
    }

    /// Take a queued item back to `Idle`.
    pub fn unqueue(&mut self) -> Result<()> {
        if self.status != DownloadStatus::Queued {
            return Err(DataReelError::InvalidTransition {
                from: self.status,
                action: "dequeue",
            });
        }
        self.set_status(DownloadStatus::Idle);
        Ok(())
    }

    /// Mark as waiting on a metadata fetch.
    pub fn mark_fetching_info(&mut self) -> Result<()> {
        if self.status != DownloadStatus::Idle {
            return Err(DataReelError::InvalidTransition {
                from: self.status,
                action: "fetch info for",
            });
        }
        self.set_status(DownloadStatus::FetchingInfo);
        Ok(())
    }

    /// Record the outcome of a metadata fetch. `None` means the metadata is
    /// unavailable; the item simply carries on without it.
    pub fn finish_fetching_info(&mut self, metadata: Option<VideoMetadata>) {
        if metadata.is_some() {
            self.metadata = metadata;
        }
        if self.status == DownloadStatus::FetchingInfo {
            self.set_status(DownloadStatus::Idle);
        }
    }

    // ============================================
    // Process lifecycle
    // ============================================

    /// Spawn the tool for this item.
    ///
    /// Fails if a download is already running, or if the item is in a terminal
    /// state (use [`DownloadItem::retry`]). Pipe and spawn failures leave the
    /// status untouched.
    pub fn start(&mut self, downloader: &dyn Downloader, ctx: &SpawnContext) -> Result<()> {
        if self.status.is_running() {
            return Err(DataReelError::AlreadyDownloading);
        }
        if self.status.is_terminal() {
            return Err(DataReelError::InvalidTransition {
                from: self.status,
                action: "start",
            });
        }

        let args = downloader.build_args(&self.url, &self.output_dir, &self.options);
        let generation = self.generation + 1;
        let handle = process::spawn(
            downloader.program(),
            &args,
            self.id,
            generation,
            ctx.reap_grace,
            ctx.events.clone(),
        )?;

        self.generation = generation;
        self.process = Some(handle);
        self.lines.clear();
        self.speed = 0.0;
        self.error = None;
        self.set_status(DownloadStatus::Downloading);
        Ok(())
    }

    /// Take a queued item back to `Idle` after its spawn failed, keeping the
    /// reason on the item.
    pub fn record_start_failure(&mut self, message: String) {
        warn!(job = %self.id, %message, "Download failed to start");
        self.error = Some(message);
        if self.status == DownloadStatus::Queued {
            self.set_status(DownloadStatus::Idle);
        }
    }

    /// Terminate the process. The status flips to `Cancelled` as soon as the
    /// signal is delivered; the exit is reaped later.
    pub fn cancel(&mut self) -> Result<()> {
        let handle = self.process.as_ref().ok_or(DataReelError::NoProcess)?;
        if !self.status.is_running() {
            return Err(DataReelError::InvalidTransition {
                from: self.status,
                action: "cancel",
            });
        }

        handle.signal(Signal::Terminate)?;
        if self.status == DownloadStatus::Paused {
            // A stopped process only acts on SIGTERM once continued
            if let Err(e) = handle.signal(Signal::Continue) {
                warn!(job = %self.id, error = %e, "Failed to continue cancelled process");
            }
        }

        self.speed = 0.0;
        self.set_status(DownloadStatus::Cancelled);
        Ok(())
    }

    /// Stop the process in place.
    pub fn pause(&mut self) -> Result<()> {
        if self.status != DownloadStatus::Downloading {
            return Err(DataReelError::InvalidTransition {
                from: self.status,
                action: "pause",
            });
        }
        let handle = self.process.as_ref().ok_or(DataReelError::NoProcess)?;
        handle.signal(Signal::Stop)?;

        self.speed = 0.0;
        self.set_status(DownloadStatus::Paused);
        Ok(())
    }

    /// Continue a paused process.
    pub fn resume(&mut self) -> Result<()> {
        if self.status != DownloadStatus::Paused {
            return Err(DataReelError::InvalidTransition {
                from: self.status,
                action: "resume",
            });
        }
        let handle = self.process.as_ref().ok_or(DataReelError::NoProcess)?;
        handle.signal(Signal::Continue)?;

        self.set_status(DownloadStatus::Downloading);
        Ok(())
    }

    /// Reset a finished item to `Idle` and start it again.
    ///
    /// A process still attached from the previous run (a cancel whose exit has
    /// not been reaped yet) is dropped, which kills it; its late events carry an
    /// old generation and are ignored.
    pub fn retry(&mut self, downloader: &dyn Downloader, ctx: &SpawnContext) -> Result<()> {
        if !self.status.is_terminal() {
            return Err(DataReelError::InvalidTransition {
                from: self.status,
                action: "retry",
            });
        }

        self.process = None;
        self.progress = 0.0;
        self.speed = 0.0;
        self.eta = None;
        self.error = None;
        self.lines.clear();
        self.set_status(DownloadStatus::Idle);

        self.start(downloader, ctx)
    }

    // ============================================
    // Events from the watcher
    // ============================================

    /// Feed a raw output chunk through the line buffer and progress parser.
    ///
    /// Returns the number of progress lines applied.
    pub fn apply_output(&mut self, chunk: &[u8]) -> usize {
        // Output still in flight after cancel leaves the settled record alone
        if !self.status.is_running() {
            self.lines.clear();
            return 0;
        }
        let mut applied = 0;
        for line in self.lines.push(chunk) {
            if let Some(update) = parse_progress_line(&line) {
                self.apply_progress(&update);
                applied += 1;
            }
        }
        applied
    }

    /// Apply one parsed progress line. Absent fields keep their last value.
    pub fn apply_progress(&mut self, update: &ProgressUpdate) {
        if let Some(percent) = update.percent {
            // Never moves backwards within one run
            self.progress = self.progress.max(percent);
        }
        if self.status == DownloadStatus::Downloading {
            if let Some(speed) = update.speed {
                self.speed = speed;
            }
        }
        if let Some(ref eta) = update.eta {
            self.eta = Some(eta.clone());
        }
        debug!(
            job = %self.id,
            progress = self.progress,
            speed = self.speed,
            eta = ?self.eta,
            "Progress updated"
        );
    }

    /// Record the reaped exit and release the process.
    ///
    /// A cancelled item stays cancelled whatever the exit code says. Only a
    /// confirmed zero exit counts as success.
    pub fn apply_exit(&mut self, outcome: ExitOutcome) {
        self.process = None;
        self.lines.clear();
        self.speed = 0.0;

        if !self.status.is_running() {
            debug!(
                job = %self.id,
                status = %self.status,
                ?outcome,
                "Exit after status was settled"
            );
            return;
        }

        match outcome {
            ExitOutcome::Exited(0) => {
                self.progress = 100.0;
                self.set_status(DownloadStatus::Completed);
            }
            ExitOutcome::Exited(code) => {
                self.fail(format!("Download failed (exit code {})", code));
            }
            ExitOutcome::Signaled(signal) => {
                self.fail(format!("Download process was killed (signal {})", signal));
            }
            ExitOutcome::Unconfirmed => {
                self.fail("Download process ended but its exit status is unavailable".into());
            }
        }
    }

    fn fail(&mut self, message: String) {
        warn!(job = %self.id, %message, "Download failed");
        self.error = Some(message);
        self.set_status(DownloadStatus::Failed);
    }

    fn set_status(&mut self, status: DownloadStatus) {
        debug_assert!(
            !(status.is_pre_execution() && self.process.is_some()),
            "{} has a process attached but is entering {}",
            self.id,
            status
        );
        if self.status != status {
            info!(job = %self.id, from = %self.status, to = %status, "Status changed");
            self.status = status;
        }
    }
}
