//! Engine tests against a scripted stand-in for yt-dlp.
//!
//! The fake tool is `/bin/sh -c <script>`, so every test runs the real
//! supervisor: process group, merged pipe, signals and reaping.

use async_trait::async_trait;
use datareel::core::downloader::{Downloader, DownloaderRegistry};
use datareel::error::{DataReelError, Result};
use datareel::types::{
    Config, DownloadOptions, DownloadStatus, DownloaderKind, JobId, ToolInfo, VideoMetadata,
};
use datareel::{Engine, JobUpdate, UpdateKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
const LIMIT: Duration = Duration::from_secs(10);

const PROGRESS_LINE: &str = "[download]  45.2% of 10.00MiB at  1.50MiB/s ETA 00:05";

struct Scripted {
    kind: DownloaderKind,
    program: PathBuf,
    script: String,
    metadata: Option<VideoMetadata>,
}

impl Scripted {
    fn new(script: &str) -> Self {
        Self {
            kind: DownloaderKind::YouTube,
            program: PathBuf::from("/bin/sh"),
            script: script.to_string(),
            metadata: None,
        }
    }

    /// A tool that is not installed
    fn missing(kind: DownloaderKind) -> Self {
        Self {
            kind,
            program: PathBuf::from("/nonexistent/yt-dlp"),
            script: String::new(),
            metadata: None,
        }
    }

    fn with_metadata(mut self, metadata: VideoMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[async_trait]
impl Downloader for Scripted {
    fn kind(&self) -> DownloaderKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        "Scripted"
    }

    fn program(&self) -> &Path {
        &self.program
    }

    fn build_args(
        &self,
        _url: &str,
        _output_dir: &Path,
        _options: &DownloadOptions,
    ) -> Vec<String> {
        vec!["-c".to_string(), self.script.clone()]
    }

    async fn tool_info(&self) -> Result<ToolInfo> {
        Ok(ToolInfo {
            installed: true,
            path: Some(self.program.clone()),
            version: Some("test".into()),
        })
    }

    async fn update(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_metadata(&self, _url: &str) -> Result<VideoMetadata> {
        self.metadata
            .clone()
            .ok_or_else(|| DataReelError::Metadata("no info for this URL".into()))
    }
}

fn config(max_concurrent: usize) -> Config {
    Config {
        download_dir: std::env::temp_dir(),
        max_concurrent_downloads: max_concurrent,
        reap_grace_ms: 500,
        cache_metadata: false,
        ..Config::default()
    }
}

fn engine_with(downloader: Scripted, config: Config) -> Engine {
    let mut registry = DownloaderRegistry::new();
    registry.register(Arc::new(downloader));
    Engine::with_downloaders(config, registry)
}

fn engine(script: &str) -> Engine {
    engine_with(Scripted::new(script), config(3))
}

fn create(engine: &mut Engine) -> JobId {
    engine
        .create(URL, std::env::temp_dir(), DownloadOptions::default())
        .unwrap()
}

async fn settle(engine: &mut Engine) -> Vec<JobUpdate> {
    timeout(LIMIT, engine.run_until_settled())
        .await
        .expect("engine did not settle")
}

async fn wait_for(engine: &mut Engine, id: JobId, kind: UpdateKind) {
    timeout(LIMIT, async {
        loop {
            let update = engine.next_update().await;
            if update.job == id && update.kind == kind {
                return;
            }
        }
    })
    .await
    .expect("update never arrived");
}

#[tokio::test]
async fn test_progress_line_updates_item() {
    let mut engine = engine(&format!("echo '{}'; sleep 5", PROGRESS_LINE));
    let id = create(&mut engine);
    engine.start(id).unwrap();

    wait_for(&mut engine, id, UpdateKind::Progress).await;
    let snapshot = engine.snapshot(id).unwrap();
    assert_eq!(snapshot.status, DownloadStatus::Downloading);
    assert!((snapshot.progress - 45.2).abs() < 1e-9);
    assert!((snapshot.speed - 1.5 * 1024.0 * 1024.0).abs() < 1e-6);
    assert_eq!(snapshot.eta.as_deref(), Some("00:05"));

    engine.cancel(id).unwrap();
    settle(&mut engine).await;
}

#[tokio::test]
async fn test_nonzero_exit_fails_and_keeps_progress() {
    let mut engine = engine(&format!("echo '{}'; exit 3", PROGRESS_LINE));
    let id = create(&mut engine);
    engine.start(id).unwrap();

    let updates = settle(&mut engine).await;
    assert!(updates.contains(&JobUpdate {
        job: id,
        kind: UpdateKind::Finished(DownloadStatus::Failed),
    }));

    let snapshot = engine.snapshot(id).unwrap();
    assert_eq!(snapshot.status, DownloadStatus::Failed);
    assert!((snapshot.progress - 45.2).abs() < 1e-9);
    assert_eq!(snapshot.error.as_deref(), Some("Download failed (exit code 3)"));
    assert_eq!(snapshot.pid, None);
    assert!(snapshot.actions.retry);
}

#[tokio::test]
async fn test_zero_exit_completes() {
    let mut engine = engine("echo '[download]  10.0% of 1.00MiB at 100.00KiB/s ETA 00:09'; exit 0");
    let id = create(&mut engine);
    engine.start(id).unwrap();

    settle(&mut engine).await;
    let snapshot = engine.snapshot(id).unwrap();
    assert_eq!(snapshot.status, DownloadStatus::Completed);
    assert_eq!(snapshot.progress, 100.0);
    assert_eq!(snapshot.error, None);
}

#[tokio::test]
async fn test_noise_lines_are_ignored() {
    let mut engine = engine(
        "echo '[youtube] dQw4w9WgXcQ: Downloading webpage'; \
         echo '[download] Destination: video.mp4'; exit 0",
    );
    let id = create(&mut engine);
    engine.start(id).unwrap();

    let updates = settle(&mut engine).await;
    assert!(!updates.iter().any(|u| u.kind == UpdateKind::Progress));
    assert_eq!(engine.snapshot(id).unwrap().status, DownloadStatus::Completed);
}

#[tokio::test]
async fn test_start_while_downloading_is_rejected() {
    let mut engine = engine("sleep 5");
    let id = create(&mut engine);
    engine.start(id).unwrap();
    let pid = engine.snapshot(id).unwrap().pid;
    assert!(pid.is_some());

    assert!(matches!(engine.start(id), Err(DataReelError::AlreadyDownloading)));
    assert_eq!(engine.snapshot(id).unwrap().pid, pid);

    engine.cancel(id).unwrap();
    settle(&mut engine).await;
}

#[tokio::test]
async fn test_cancel_without_process_fails() {
    let mut engine = engine("exit 0");
    let id = create(&mut engine);
    assert!(matches!(engine.cancel(id), Err(DataReelError::NoProcess)));
    assert_eq!(engine.snapshot(id).unwrap().status, DownloadStatus::Idle);
}

#[tokio::test]
async fn test_pause_then_resume() {
    let mut engine = engine("echo '[download]  20.0% of 1.00MiB at 1.00KiB/s ETA 00:10'; sleep 5");
    let id = create(&mut engine);
    engine.start(id).unwrap();
    wait_for(&mut engine, id, UpdateKind::Progress).await;

    engine.pause(id).unwrap();
    let paused = engine.snapshot(id).unwrap();
    assert_eq!(paused.status, DownloadStatus::Paused);
    assert_eq!(paused.speed, 0.0);
    assert!(paused.actions.resume);
    assert!(!paused.actions.pause);

    assert!(matches!(
        engine.pause(id),
        Err(DataReelError::InvalidTransition { .. })
    ));

    engine.resume(id).unwrap();
    let resumed = engine.snapshot(id).unwrap();
    assert_eq!(resumed.status, DownloadStatus::Downloading);
    assert!((resumed.progress - 20.0).abs() < 1e-9);

    engine.cancel(id).unwrap();
    settle(&mut engine).await;
}

#[tokio::test]
async fn test_cancel_stays_cancelled_after_clean_exit() {
    // The tool handles SIGTERM by exiting 0
    let mut engine = engine("trap 'exit 0' TERM; sleep 5 & wait");
    let id = create(&mut engine);
    engine.start(id).unwrap();

    engine.cancel(id).unwrap();
    assert_eq!(engine.snapshot(id).unwrap().status, DownloadStatus::Cancelled);

    settle(&mut engine).await;
    let snapshot = engine.snapshot(id).unwrap();
    assert_eq!(snapshot.status, DownloadStatus::Cancelled);
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.pid, None);
}

#[tokio::test]
async fn test_cancel_paused_download() {
    let mut engine = engine("sleep 5");
    let id = create(&mut engine);
    engine.start(id).unwrap();
    engine.pause(id).unwrap();

    engine.cancel(id).unwrap();
    settle(&mut engine).await;
    assert_eq!(engine.snapshot(id).unwrap().status, DownloadStatus::Cancelled);
}

#[tokio::test]
async fn test_retry_after_failure() {
    let mut engine = engine(&format!("echo '{}'; exit 1", PROGRESS_LINE));
    let id = create(&mut engine);
    engine.start(id).unwrap();
    settle(&mut engine).await;
    assert_eq!(engine.snapshot(id).unwrap().status, DownloadStatus::Failed);
    let first_generation = engine.jobs().get(id).unwrap().generation();

    engine.retry(id).unwrap();
    let snapshot = engine.snapshot(id).unwrap();
    assert_eq!(snapshot.status, DownloadStatus::Downloading);
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.progress, 0.0);
    assert!(snapshot.pid.is_some());
    assert!(engine.jobs().get(id).unwrap().generation() > first_generation);

    settle(&mut engine).await;
    assert_eq!(engine.snapshot(id).unwrap().status, DownloadStatus::Failed);
}

#[tokio::test]
async fn test_retry_requires_finished_item() {
    let mut engine = engine("exit 0");
    let id = create(&mut engine);
    assert!(matches!(
        engine.retry(id),
        Err(DataReelError::InvalidTransition {
            from: DownloadStatus::Idle,
            ..
        })
    ));
}

#[tokio::test]
async fn test_retry_before_cancel_is_reaped() {
    let mut engine = engine("sleep 0.2; exit 0");
    let id = create(&mut engine);
    engine.start(id).unwrap();
    engine.cancel(id).unwrap();

    // The first run's late events carry an old generation
    engine.retry(id).unwrap();
    settle(&mut engine).await;
    assert_eq!(engine.snapshot(id).unwrap().status, DownloadStatus::Completed);
}

#[tokio::test]
async fn test_queue_respects_concurrency_limit() {
    let mut engine = engine_with(Scripted::new("sleep 0.2; exit 0"), config(1));
    let first = create(&mut engine);
    let second = create(&mut engine);

    engine.enqueue(first).unwrap();
    engine.enqueue(second).unwrap();
    assert_eq!(engine.snapshot(first).unwrap().status, DownloadStatus::Downloading);
    assert_eq!(engine.snapshot(second).unwrap().status, DownloadStatus::Queued);
    assert_eq!(engine.jobs().running_count(), 1);

    let updates = settle(&mut engine).await;
    assert!(updates.contains(&JobUpdate {
        job: second,
        kind: UpdateKind::Started,
    }));
    assert_eq!(engine.snapshot(first).unwrap().status, DownloadStatus::Completed);
    assert_eq!(engine.snapshot(second).unwrap().status, DownloadStatus::Completed);
}

#[tokio::test]
async fn test_dequeue_returns_to_idle() {
    let mut engine = engine_with(Scripted::new("sleep 5"), config(1));
    let running = create(&mut engine);
    let waiting = create(&mut engine);
    engine.enqueue(running).unwrap();
    engine.enqueue(waiting).unwrap();

    engine.dequeue(waiting).unwrap();
    assert_eq!(engine.snapshot(waiting).unwrap().status, DownloadStatus::Idle);

    engine.cancel(running).unwrap();
    settle(&mut engine).await;
    assert_eq!(engine.snapshot(waiting).unwrap().status, DownloadStatus::Idle);
}

#[tokio::test]
async fn test_auto_start_enqueues_on_create() {
    let config = Config {
        auto_start: true,
        ..config(3)
    };
    let mut engine = engine_with(Scripted::new("exit 0"), config);
    let id = create(&mut engine);
    assert_eq!(engine.snapshot(id).unwrap().status, DownloadStatus::Downloading);

    settle(&mut engine).await;
    assert_eq!(engine.snapshot(id).unwrap().status, DownloadStatus::Completed);
}

#[tokio::test]
async fn test_remove_refuses_running_job() {
    let mut engine = engine("sleep 5");
    let id = create(&mut engine);
    engine.start(id).unwrap();

    assert!(matches!(engine.remove(id), Err(DataReelError::StillRunning)));

    engine.cancel(id).unwrap();
    settle(&mut engine).await;
    let removed = engine.remove(id).unwrap();
    assert_eq!(removed.status(), DownloadStatus::Cancelled);
    assert!(matches!(engine.snapshot(id), Err(DataReelError::UnknownJob(_))));
}

#[tokio::test]
async fn test_bulk_operations_report_counts() {
    let mut engine = engine("sleep 5");
    let a = create(&mut engine);
    let b = create(&mut engine);
    let idle = create(&mut engine);
    engine.start(a).unwrap();
    engine.start(b).unwrap();

    assert_eq!(engine.pause_all(), 2);
    assert_eq!(engine.pause_all(), 0);
    assert_eq!(engine.resume_all(), 2);
    assert_eq!(engine.pause_all(), 2);
    assert_eq!(engine.cancel_all(), 2);

    settle(&mut engine).await;
    assert_eq!(engine.snapshot(a).unwrap().status, DownloadStatus::Cancelled);
    assert_eq!(engine.snapshot(b).unwrap().status, DownloadStatus::Cancelled);
    assert_eq!(engine.snapshot(idle).unwrap().status, DownloadStatus::Idle);
}

#[tokio::test]
async fn test_snapshots_are_ordered() {
    let mut engine = engine("exit 0");
    let ids: Vec<JobId> = (0..4).map(|_| create(&mut engine)).collect();
    let listed: Vec<JobId> = engine.snapshots().iter().map(|s| s.id).collect();
    assert_eq!(listed, ids);
}

#[tokio::test]
async fn test_request_metadata_attaches_title() {
    let metadata = VideoMetadata {
        title: Some("Never Gonna Give You Up".into()),
        uploader: Some("Rick Astley".into()),
        duration: Some("00:03:33".into()),
        thumbnail_url: None,
        description: None,
        filesize: None,
        format_note: None,
        formats: Vec::new(),
        available_qualities: Vec::new(),
    };
    let mut engine = engine_with(Scripted::new("exit 0").with_metadata(metadata), config(3));
    let id = create(&mut engine);

    engine.request_metadata(id).unwrap();
    assert_eq!(engine.snapshot(id).unwrap().status, DownloadStatus::FetchingInfo);
    assert!(matches!(
        engine.request_metadata(id),
        Err(DataReelError::InvalidTransition { .. })
    ));

    wait_for(&mut engine, id, UpdateKind::MetadataReady).await;
    let snapshot = engine.snapshot(id).unwrap();
    assert_eq!(snapshot.status, DownloadStatus::Idle);
    assert_eq!(snapshot.title.as_deref(), Some("Never Gonna Give You Up"));
}

#[tokio::test]
async fn test_request_metadata_failure_is_reported() {
    let mut engine = engine("exit 0");
    let id = create(&mut engine);
    engine.request_metadata(id).unwrap();

    let update = timeout(LIMIT, engine.next_update()).await.unwrap();
    assert_eq!(update.job, id);
    assert!(matches!(update.kind, UpdateKind::MetadataUnavailable(_)));

    let snapshot = engine.snapshot(id).unwrap();
    assert_eq!(snapshot.status, DownloadStatus::Idle);
    assert_eq!(snapshot.title, None);
}

#[tokio::test]
async fn test_preview_rejects_bad_url() {
    let engine = engine("exit 0");
    assert!(matches!(
        engine.preview("not a url").await,
        Err(DataReelError::InvalidUrl(_))
    ));
}

#[tokio::test]
async fn test_create_rejects_bad_input() {
    let mut engine = engine("exit 0");
    assert!(matches!(
        engine.create("", std::env::temp_dir(), DownloadOptions::default()),
        Err(DataReelError::InvalidUrl(_))
    ));
    assert!(matches!(
        engine.create_with_kind(
            DownloaderKind::Instagram,
            URL,
            std::env::temp_dir(),
            DownloadOptions::default()
        ),
        Err(DataReelError::NoDownloader(DownloaderKind::Instagram))
    ));
    assert!(matches!(
        engine.start(JobId(99)),
        Err(DataReelError::UnknownJob(JobId(99)))
    ));
}

#[tokio::test]
async fn test_clear_finished() {
    let mut engine = engine("exit 0");
    let done = create(&mut engine);
    let idle = create(&mut engine);
    engine.start(done).unwrap();
    settle(&mut engine).await;

    assert_eq!(engine.clear_finished(), 1);
    assert!(engine.jobs().contains(idle));
    assert!(!engine.jobs().contains(done));
}

#[tokio::test]
async fn test_shutdown_cancels_everything() {
    let mut engine = engine("sleep 5");
    let a = create(&mut engine);
    let b = create(&mut engine);
    engine.start(a).unwrap();
    engine.start(b).unwrap();

    engine.shutdown(LIMIT).await;
    assert!(engine.is_settled());
    assert_eq!(engine.snapshot(a).unwrap().status, DownloadStatus::Cancelled);
    assert_eq!(engine.snapshot(b).unwrap().status, DownloadStatus::Cancelled);
}

#[tokio::test]
async fn test_enqueue_reports_spawn_failure() {
    let mut engine = engine_with(Scripted::missing(DownloaderKind::YouTube), config(3));
    let id = create(&mut engine);

    assert!(matches!(
        engine.enqueue(id),
        Err(DataReelError::MissingDependency(_))
    ));
    let snapshot = engine.snapshot(id).unwrap();
    assert_eq!(snapshot.status, DownloadStatus::Idle);
    assert!(snapshot.error.is_some());
    assert_eq!(snapshot.pid, None);
    assert!(engine.is_settled());
}

#[tokio::test]
async fn test_auto_start_create_reports_spawn_failure() {
    let config = Config {
        auto_start: true,
        ..config(3)
    };
    let mut engine = engine_with(Scripted::missing(DownloaderKind::YouTube), config);

    let result = engine.create(URL, std::env::temp_dir(), DownloadOptions::default());
    assert!(matches!(result, Err(DataReelError::MissingDependency(_))));

    // The job stays registered so the failure can be inspected and retried
    let snapshots = engine.snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].status, DownloadStatus::Idle);
    assert!(snapshots[0].error.is_some());
}

#[tokio::test]
async fn test_promoted_job_reports_spawn_failure() {
    let mut registry = DownloaderRegistry::new();
    registry.register(Arc::new(Scripted::new("sleep 0.2; exit 0")));
    registry.register(Arc::new(Scripted::missing(DownloaderKind::Generic)));
    let mut engine = Engine::with_downloaders(config(1), registry);

    let running = create(&mut engine);
    let waiting = engine
        .create_with_kind(
            DownloaderKind::Generic,
            URL,
            std::env::temp_dir(),
            DownloadOptions::default(),
        )
        .unwrap();
    engine.enqueue(running).unwrap();
    engine.enqueue(waiting).unwrap();
    assert_eq!(engine.snapshot(waiting).unwrap().status, DownloadStatus::Queued);

    let updates = settle(&mut engine).await;
    assert!(updates.iter().any(|u| {
        u.job == waiting && matches!(u.kind, UpdateKind::StartFailed(_))
    }));
    assert_eq!(engine.snapshot(running).unwrap().status, DownloadStatus::Completed);
    let failed = engine.snapshot(waiting).unwrap();
    assert_eq!(failed.status, DownloadStatus::Idle);
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn test_signal_to_exited_process_fails() {
    let mut engine = engine("exit 0");
    let id = create(&mut engine);
    engine.start(id).unwrap();

    // The watcher reaps the child while its exit event waits in the channel
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(matches!(engine.pause(id), Err(DataReelError::Signal { .. })));
    assert_eq!(engine.snapshot(id).unwrap().status, DownloadStatus::Downloading);

    settle(&mut engine).await;
    assert_eq!(engine.snapshot(id).unwrap().status, DownloadStatus::Completed);
}

#[tokio::test]
async fn test_hang_up_without_exit_fails() {
    let config = Config {
        reap_grace_ms: 200,
        ..config(3)
    };
    let mut engine = engine_with(Scripted::new("exec >/dev/null 2>&1; sleep 5"), config);
    let id = create(&mut engine);
    engine.start(id).unwrap();

    settle(&mut engine).await;
    let snapshot = engine.snapshot(id).unwrap();
    assert_eq!(snapshot.status, DownloadStatus::Failed);
    assert!(
        snapshot
            .error
            .as_deref()
            .is_some_and(|e| e.contains("exit status is unavailable"))
    );
    assert_eq!(snapshot.pid, None);
}
