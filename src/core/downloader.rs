//! Downloader module - yt-dlp integration
//!
//! Each supported external tool implements [`Downloader`]; the
//! [`DownloaderRegistry`] maps a [`DownloaderKind`] to its implementation and
//! is consulted whenever an item is started.

use crate::core::args::build_args;
use crate::core::metadata::parse_metadata;
use crate::error::{DataReelError, Result};
use crate::types::{DownloadOptions, DownloaderKind, ToolInfo, VideoMetadata};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Timeout for `--dump-json` queries
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for `--version`
const VERSION_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for `-U`
const UPDATE_TIMEOUT: Duration = Duration::from_secs(300);

/// An external download tool.
#[async_trait]
pub trait Downloader: Send + Sync {
    fn kind(&self) -> DownloaderKind;

    /// Display name, e.g. "YouTube"
    fn name(&self) -> &'static str;

    /// Program spawned for downloads
    fn program(&self) -> &Path;

    /// Argument vector for one download, program excluded.
    fn build_args(&self, url: &str, output_dir: &Path, options: &DownloadOptions) -> Vec<String>;

    /// Whether the tool is installed, where, and which version.
    async fn tool_info(&self) -> Result<ToolInfo>;

    /// Update the tool in place.
    async fn update(&self) -> Result<()>;

    /// Fetch metadata for a single URL.
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata>;
}

/// yt-dlp
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output> {
        let mut command = Command::new(&self.program);
        command.args(args).kill_on_drop(true);
        run_with_timeout(&mut command, timeout)
            .await
            .map_err(|e| match e {
                DataReelError::File(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    DataReelError::MissingDependency(self.program.display().to_string())
                }
                other => other,
            })
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl Downloader for YtDlp {
    fn kind(&self) -> DownloaderKind {
        DownloaderKind::YouTube
    }

    fn name(&self) -> &'static str {
        "YouTube"
    }

    fn program(&self) -> &Path {
        &self.program
    }

    fn build_args(&self, url: &str, output_dir: &Path, options: &DownloadOptions) -> Vec<String> {
        build_args(url, output_dir, options)
    }

    async fn tool_info(&self) -> Result<ToolInfo> {
        let Some(path) = locate_program(&self.program).await else {
            return Ok(ToolInfo {
                installed: false,
                path: None,
                version: None,
            });
        };

        let output = self.run(&["--version"], VERSION_TIMEOUT).await?;
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();

        Ok(ToolInfo {
            installed: true,
            path: Some(path),
            version: (!version.is_empty()).then_some(version),
        })
    }

    async fn update(&self) -> Result<()> {
        info!(program = %self.program.display(), "Updating download tool");
        let output = self.run(&["-U"], UPDATE_TIMEOUT).await?;
        if !output.status.success() {
            return Err(DataReelError::Tool {
                tool: self.program.display().to_string(),
                message: format!(
                    "update exited with code: {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        debug!(url, "Fetching metadata");
        let output = self
            .run(&["--dump-json", "--no-playlist", url], METADATA_TIMEOUT)
            .await?;

        if !output.status.success() {
            return Err(DataReelError::Metadata(format!(
                "{} exited with code: {:?}",
                self.program.display(),
                output.status.code()
            )));
        }

        parse_metadata(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Run a command, giving up after `timeout`.
async fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<Output> {
    match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(DataReelError::File(e)),
        Err(_) => Err(DataReelError::Tool {
            tool: format!("{:?}", command.as_std().get_program()),
            message: format!("timed out after {}s", timeout.as_secs()),
        }),
    }
}

/// Resolve a program to a path: explicit paths are checked directly, bare
/// names are looked up in PATH.
pub async fn locate_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return tokio::fs::metadata(program)
            .await
            .ok()
            .filter(|m| m.is_file())
            .map(|_| program.to_path_buf());
    }

    let output = Command::new("which").arg(program).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// Check if a command is available
pub async fn is_command_available(program: &Path) -> bool {
    locate_program(program).await.is_some()
}

/// Downloader implementations by kind
#[derive(Clone, Default)]
pub struct DownloaderRegistry {
    downloaders: HashMap<DownloaderKind, Arc<dyn Downloader>>,
}

impl DownloaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with yt-dlp handling YouTube.
    pub fn with_ytdlp(program: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(YtDlp::new(program)));
        registry
    }

    /// Register `downloader` under its kind, replacing any previous one.
    pub fn register(&mut self, downloader: Arc<dyn Downloader>) {
        self.downloaders.insert(downloader.kind(), downloader);
    }

    pub fn get(&self, kind: DownloaderKind) -> Result<Arc<dyn Downloader>> {
        self.downloaders
            .get(&kind)
            .cloned()
            .ok_or(DataReelError::NoDownloader(kind))
    }

    pub fn kinds(&self) -> Vec<DownloaderKind> {
        self.downloaders.keys().copied().collect()
    }
}

impl std::fmt::Debug for DownloaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloaderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
