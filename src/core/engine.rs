//! Download engine: one session's jobs and the loop that drives them
//!
//! The engine owns the [`JobRegistry`] and is the only thing that mutates
//! items. Watcher tasks and metadata workers never touch an item; they post
//! events to the engine's channels, and the caller's loop applies them one at
//! a time through [`Engine::next_update`] or [`Engine::drain_pending`].

use crate::core::downloader::{Downloader, DownloaderRegistry};
use crate::core::item::{DownloadItem, SpawnContext, validate_url};
use crate::core::process::{ProcessEvent, ProcessEventKind};
use crate::core::registry::JobRegistry;
use crate::error::{DataReelError, Result};
use crate::storage::cache::MetadataCache;
use crate::types::{
    Config, DownloadOptions, DownloadStatus, DownloaderKind, ItemSnapshot, JobId, VideoMetadata,
};
use crate::utils::paths::get_metadata_cache_dir;
use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Result of a metadata worker, posted back to the loop
#[derive(Debug)]
struct MetadataEvent {
    job: JobId,
    result: Result<VideoMetadata>,
}

enum Incoming {
    Process(ProcessEvent),
    Metadata(MetadataEvent),
}

/// What changed on a job
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    /// Progress, speed or ETA moved
    Progress,
    /// The process exited and the item settled in this status
    Finished(DownloadStatus),
    /// A queued item got a slot and started
    Started,
    /// A queued item got a slot but its process could not be spawned; the item
    /// is back to `Idle` with the reason in its error
    StartFailed(String),
    MetadataReady,
    /// The fetch failed; the item carries on without metadata
    MetadataUnavailable(String),
}

/// One change for the presentation layer to render
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub job: JobId,
    pub kind: UpdateKind,
}

pub struct Engine {
    config: Config,
    jobs: JobRegistry,
    downloaders: DownloaderRegistry,
    cache: Option<MetadataCache>,
    queue: VecDeque<JobId>,
    process_tx: UnboundedSender<ProcessEvent>,
    process_rx: UnboundedReceiver<ProcessEvent>,
    metadata_tx: UnboundedSender<MetadataEvent>,
    metadata_rx: UnboundedReceiver<MetadataEvent>,
    /// Updates produced outside the loop (queue promotions) awaiting delivery
    backlog: VecDeque<JobUpdate>,
}

impl Engine {
    /// Engine with yt-dlp registered for YouTube.
    pub fn new(config: Config) -> Self {
        let downloaders = DownloaderRegistry::with_ytdlp(config.ytdlp_program.clone());
        Self::with_downloaders(config, downloaders)
    }

    pub fn with_downloaders(config: Config, downloaders: DownloaderRegistry) -> Self {
        let cache = config
            .cache_metadata
            .then(|| MetadataCache::new(get_metadata_cache_dir(), config.metadata_ttl));
        let (process_tx, process_rx) = mpsc::unbounded_channel();
        let (metadata_tx, metadata_rx) = mpsc::unbounded_channel();

        Self {
            config,
            jobs: JobRegistry::new(),
            downloaders,
            cache,
            queue: VecDeque::new(),
            process_tx,
            process_rx,
            metadata_tx,
            metadata_rx,
            backlog: VecDeque::new(),
        }
    }

    /// Replace the metadata cache (or turn it off with `None`).
    pub fn set_metadata_cache(&mut self, cache: Option<MetadataCache>) {
        self.cache = cache;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn downloader(&self, kind: DownloaderKind) -> Result<Arc<dyn Downloader>> {
        self.downloaders.get(kind)
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    // ============================================
    // Job lifecycle
    // ============================================

    /// Create and register an idle job for the default downloader.
    ///
    /// With `auto_start` the job is enqueued too; a spawn failure is returned
    /// and the job stays registered, `Idle`, with the reason in its error.
    pub fn create(
        &mut self,
        url: &str,
        output_dir: impl Into<PathBuf>,
        options: DownloadOptions,
    ) -> Result<JobId> {
        self.create_with_kind(DownloaderKind::default(), url, output_dir, options)
    }

    pub fn create_with_kind(
        &mut self,
        kind: DownloaderKind,
        url: &str,
        output_dir: impl Into<PathBuf>,
        options: DownloadOptions,
    ) -> Result<JobId> {
        // Fail early rather than at start time
        self.downloaders.get(kind)?;

        let id = self.jobs.allocate_id();
        let item = DownloadItem::new(id, url, output_dir, options, kind)?;
        self.jobs.register(item);
        info!(job = %id, url, "Job created");

        if self.config.auto_start {
            self.enqueue(id)?;
        }
        Ok(id)
    }

    /// Deregister a job. Refused while its process is still attached.
    pub fn remove(&mut self, id: JobId) -> Result<DownloadItem> {
        let item = self.jobs.remove(id)?;
        self.queue.retain(|queued| *queued != id);
        Ok(item)
    }

    /// Drop every completed, failed or cancelled job that has been reaped.
    pub fn clear_finished(&mut self) -> usize {
        self.jobs.clear_finished()
    }

    /// Start a job right away, bypassing the queue.
    pub fn start(&mut self, id: JobId) -> Result<()> {
        let downloader = self.downloaders.get(self.jobs.get(id)?.kind())?;
        let ctx = self.spawn_context();
        self.jobs.get_mut(id)?.start(downloader.as_ref(), &ctx)?;
        self.queue.retain(|queued| *queued != id);
        Ok(())
    }

    /// Queue a job; it starts when fewer than `max_concurrent_downloads`
    /// processes are running. If it gets a slot right away and the spawn
    /// fails, that error is returned here.
    pub fn enqueue(&mut self, id: JobId) -> Result<()> {
        self.jobs.get_mut(id)?.mark_queued()?;
        self.queue.push_back(id);
        self.promote_queued(Some(id))
    }

    /// Take a queued job out of the queue, back to `Idle`.
    pub fn dequeue(&mut self, id: JobId) -> Result<()> {
        self.jobs.get_mut(id)?.unqueue()?;
        self.queue.retain(|queued| *queued != id);
        Ok(())
    }

    pub fn cancel(&mut self, id: JobId) -> Result<()> {
        self.jobs.get_mut(id)?.cancel()
    }

    pub fn pause(&mut self, id: JobId) -> Result<()> {
        self.jobs.get_mut(id)?.pause()
    }

    pub fn resume(&mut self, id: JobId) -> Result<()> {
        self.jobs.get_mut(id)?.resume()
    }

    /// Reset a finished job and spawn it again.
    pub fn retry(&mut self, id: JobId) -> Result<()> {
        let downloader = self.downloaders.get(self.jobs.get(id)?.kind())?;
        let ctx = self.spawn_context();
        self.jobs.get_mut(id)?.retry(downloader.as_ref(), &ctx)
    }

    // ============================================
    // Bulk operations
    // ============================================

    /// Pause every downloading job. Returns how many were paused.
    pub fn pause_all(&mut self) -> usize {
        self.for_each_with_status(&[DownloadStatus::Downloading], "pause", DownloadItem::pause)
    }

    /// Resume every paused job. Returns how many were resumed.
    pub fn resume_all(&mut self) -> usize {
        self.for_each_with_status(&[DownloadStatus::Paused], "resume", DownloadItem::resume)
    }

    /// Cancel every running job and empty the queue. Returns how many
    /// processes were signalled.
    pub fn cancel_all(&mut self) -> usize {
        for id in std::mem::take(&mut self.queue) {
            if let Ok(item) = self.jobs.get_mut(id) {
                let _ = item.unqueue();
            }
        }
        self.for_each_with_status(
            &[DownloadStatus::Downloading, DownloadStatus::Paused],
            "cancel",
            DownloadItem::cancel,
        )
    }

    fn for_each_with_status(
        &mut self,
        statuses: &[DownloadStatus],
        action: &str,
        op: fn(&mut DownloadItem) -> Result<()>,
    ) -> usize {
        let mut done = 0;
        for item in self.jobs.iter_mut() {
            if !statuses.contains(&item.status()) {
                continue;
            }
            match op(item) {
                Ok(()) => done += 1,
                Err(e) => warn!(job = %item.id(), action, error = %e, "Bulk operation skipped job"),
            }
        }
        done
    }

    // ============================================
    // Snapshots
    // ============================================

    pub fn snapshot(&self, id: JobId) -> Result<ItemSnapshot> {
        Ok(self.jobs.get(id)?.snapshot())
    }

    /// Snapshots of every job, ordered by id.
    pub fn snapshots(&self) -> Vec<ItemSnapshot> {
        let mut snapshots: Vec<ItemSnapshot> =
            self.jobs.iter().map(DownloadItem::snapshot).collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }

    // ============================================
    // Metadata
    // ============================================

    /// Fetch metadata for a job on a worker task. The result arrives through
    /// the loop as `MetadataReady` or `MetadataUnavailable`.
    pub fn request_metadata(&mut self, id: JobId) -> Result<()> {
        let item = self.jobs.get(id)?;
        let downloader = self.downloaders.get(item.kind())?;
        let url = item.url().to_string();
        self.jobs.get_mut(id)?.mark_fetching_info()?;

        let cache = self.cache.clone();
        let tx = self.metadata_tx.clone();
        tokio::spawn(async move {
            let result = fetch_with_cache(downloader.as_ref(), cache.as_ref(), &url).await;
            let _ = tx.send(MetadataEvent { job: id, result });
        });
        Ok(())
    }

    /// Fetch metadata for a URL that has no job yet, on a worker task.
    pub fn preview(&self, url: &str) -> impl Future<Output = Result<VideoMetadata>> + Send + use<> {
        let url = url.to_string();
        let downloader = self.downloaders.get(DownloaderKind::default());
        let cache = self.cache.clone();

        async move {
            validate_url(&url)?;
            let downloader = downloader?;
            let worker = tokio::spawn(async move {
                fetch_with_cache(downloader.as_ref(), cache.as_ref(), &url).await
            });
            worker
                .await
                .map_err(|e| DataReelError::Metadata(format!("metadata worker failed: {}", e)))?
        }
    }

    // ============================================
    // Event loop
    // ============================================

    /// Wait for the next change and apply it.
    ///
    /// Waits forever when nothing is running; see [`Engine::is_settled`].
    pub async fn next_update(&mut self) -> JobUpdate {
        loop {
            if let Some(update) = self.backlog.pop_front() {
                return update;
            }
            let event = tokio::select! {
                Some(event) = self.process_rx.recv() => Incoming::Process(event),
                Some(event) = self.metadata_rx.recv() => Incoming::Metadata(event),
            };
            let update = match event {
                Incoming::Process(event) => self.apply_process_event(event),
                Incoming::Metadata(event) => self.apply_metadata_event(event),
            };
            if let Some(update) = update {
                return update;
            }
        }
    }

    /// Apply every event already waiting, without blocking.
    pub fn drain_pending(&mut self) -> Vec<JobUpdate> {
        let mut updates: Vec<JobUpdate> = self.backlog.drain(..).collect();
        while let Ok(event) = self.process_rx.try_recv() {
            updates.extend(self.apply_process_event(event));
        }
        while let Ok(event) = self.metadata_rx.try_recv() {
            updates.extend(self.apply_metadata_event(event));
        }
        updates.extend(self.backlog.drain(..));
        updates
    }

    /// Nothing running, queued or being fetched.
    pub fn is_settled(&self) -> bool {
        self.queue.is_empty()
            && self.backlog.is_empty()
            && self
                .jobs
                .iter()
                .all(|item| !item.has_process() && item.status() != DownloadStatus::FetchingInfo)
    }

    /// Drive the loop until [`Engine::is_settled`], collecting every update.
    pub async fn run_until_settled(&mut self) -> Vec<JobUpdate> {
        let mut updates = Vec::new();
        while !self.is_settled() {
            updates.push(self.next_update().await);
        }
        updates.extend(self.backlog.drain(..));
        updates
    }

    /// Cancel everything and wait up to `timeout` for the exits. Processes
    /// still alive after that are killed when their items are dropped.
    pub async fn shutdown(&mut self, timeout: Duration) {
        let cancelled = self.cancel_all();
        info!(cancelled, "Shutting down download engine");
        if tokio::time::timeout(timeout, self.run_until_settled())
            .await
            .is_err()
        {
            warn!("Timed out waiting for download processes to exit");
        }
    }

    fn apply_process_event(&mut self, event: ProcessEvent) -> Option<JobUpdate> {
        let Ok(item) = self.jobs.get_mut(event.job) else {
            debug!(job = %event.job, "Event for a removed job");
            return None;
        };
        if item.generation() != event.generation {
            debug!(
                job = %event.job,
                generation = event.generation,
                "Discarding stale process event"
            );
            return None;
        }

        let job = event.job;
        match event.kind {
            ProcessEventKind::Output(chunk) => {
                (item.apply_output(&chunk) > 0).then_some(JobUpdate {
                    job,
                    kind: UpdateKind::Progress,
                })
            }
            ProcessEventKind::Exited(outcome) => {
                item.apply_exit(outcome);
                let status = item.status();
                // No requested job, so failures only surface as updates
                let _ = self.promote_queued(None);
                Some(JobUpdate {
                    job,
                    kind: UpdateKind::Finished(status),
                })
            }
        }
    }

    fn apply_metadata_event(&mut self, event: MetadataEvent) -> Option<JobUpdate> {
        let Ok(item) = self.jobs.get_mut(event.job) else {
            return None;
        };
        let kind = match event.result {
            Ok(metadata) => {
                item.finish_fetching_info(Some(metadata));
                UpdateKind::MetadataReady
            }
            Err(e) => {
                warn!(job = %event.job, error = %e, "Metadata unavailable");
                item.finish_fetching_info(None);
                UpdateKind::MetadataUnavailable(e.to_string())
            }
        };
        Some(JobUpdate {
            job: event.job,
            kind,
        })
    }

    /// Start queued jobs, oldest first, while slots are free.
    ///
    /// A spawn failure for `requested` is returned; any other is reported as a
    /// `StartFailed` update.
    fn promote_queued(&mut self, requested: Option<JobId>) -> Result<()> {
        let mut requested_error = None;
        while self.jobs.running_count() < self.config.max_concurrent_downloads {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            let Ok(item) = self.jobs.get(id) else {
                continue;
            };
            if item.status() != DownloadStatus::Queued {
                continue;
            }

            match self.start(id) {
                Ok(()) => self.backlog.push_back(JobUpdate {
                    job: id,
                    kind: UpdateKind::Started,
                }),
                Err(e) => {
                    if let Ok(item) = self.jobs.get_mut(id) {
                        item.record_start_failure(e.to_string());
                    }
                    if requested == Some(id) {
                        requested_error = Some(e);
                    } else {
                        self.backlog.push_back(JobUpdate {
                            job: id,
                            kind: UpdateKind::StartFailed(e.to_string()),
                        });
                    }
                }
            }
        }
        requested_error.map_or(Ok(()), Err)
    }

    fn spawn_context(&self) -> SpawnContext {
        SpawnContext {
            events: self.process_tx.clone(),
            reap_grace: Duration::from_millis(self.config.reap_grace_ms),
        }
    }
}

/// Look in the cache, else ask the tool and remember the answer.
async fn fetch_with_cache(
    downloader: &dyn Downloader,
    cache: Option<&MetadataCache>,
    url: &str,
) -> Result<VideoMetadata> {
    if let Some(cache) = cache {
        if let Some(metadata) = cache.get(url).await {
            return Ok(metadata);
        }
    }

    let metadata = downloader.fetch_metadata(url).await?;

    if let Some(cache) = cache {
        // Caching is best-effort
        if let Err(e) = cache.set(url, &metadata).await {
            debug!(url, error = %e, "Failed to cache metadata");
        }
    }
    Ok(metadata)
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("jobs", &self.jobs.len())
            .field("queued", &self.queue.len())
            .field("downloaders", &self.downloaders)
            .finish()
    }
}
