//! Type definitions for datareel
//!
//! Source of truth for the data structures shared between the engine and
//! whatever presentation layer sits on top of it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================
// Identity
// ============================================

/// Identity of a download job within one engine session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Which downloader implementation handles an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloaderKind {
    #[default]
    YouTube,
    Instagram,
    Twitter,
    Generic,
}

impl fmt::Display for DownloaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::YouTube => "YouTube",
            Self::Instagram => "Instagram",
            Self::Twitter => "Twitter",
            Self::Generic => "Generic",
        };
        f.write_str(name)
    }
}

// ============================================
// Download Options
// ============================================

/// Section of the media to download. An absent end means "to the end".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// e.g. "00:01:00"
    pub start: String,
    pub end: Option<String>,
}

/// Options for one download. Immutable once attached to a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Extract audio only
    pub audio_only: bool,
    /// Download, auto-generate and embed subtitles
    pub subtitles: bool,
    pub embed_thumbnail: bool,
    /// Download the whole playlist instead of the single item
    pub playlist: bool,
    /// Playlist item cap; ignored unless `playlist` is set
    pub max_downloads: Option<u32>,
    pub time_range: Option<TimeRange>,
    /// yt-dlp format selector
    pub custom_format: Option<String>,
    /// Output filename template, relative to the output directory
    pub output_template: Option<String>,
}

// ============================================
// Metadata Types
// ============================================

/// One downloadable format reported by the tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFormat {
    /// Format code for yt-dlp
    pub format_id: String,
    /// "1080p", "medium", etc.
    pub format_note: Option<String>,
    /// "1920x1080" or "audio only"
    pub resolution: Option<String>,
    pub ext: String,
    pub filesize: Option<u64>,
}

/// Metadata fetched once per URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: Option<String>,
    pub uploader: Option<String>,
    /// Formatted as "HH:MM:SS"
    pub duration: Option<String>,
    pub thumbnail_url: Option<String>,
    pub description: Option<String>,
    /// Bytes, exact or approximate
    pub filesize: Option<u64>,
    pub format_note: Option<String>,
    pub formats: Vec<VideoFormat>,
    /// Human-readable choices; "Best Quality" first when any format exists
    pub available_qualities: Vec<String>,
}

/// Installation state of the external tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub installed: bool,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
}

// ============================================
// State Machine Types
// ============================================

/// Status of a download item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    #[default]
    Idle,
    FetchingInfo,
    Queued,
    Processing,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    /// Completed, failed or cancelled. Only `retry` leaves these.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// States in which no process may be running.
    pub fn is_pre_execution(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::FetchingInfo | Self::Queued | Self::Processing
        )
    }

    /// A process is attached and has not been reaped.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Downloading | Self::Paused)
    }

    /// Text shown next to the item.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::FetchingInfo => "Fetching info...",
            Self::Queued => "Queued",
            Self::Processing => "Processing...",
            Self::Downloading => "Downloading",
            Self::Paused => "Paused",
            Self::Completed => "✓ Completed",
            Self::Failed => "✗ Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Which user actions make sense from this status.
    pub fn actions(self) -> AvailableActions {
        AvailableActions {
            pause: self == Self::Downloading,
            resume: self == Self::Paused,
            cancel: self.is_running(),
            retry: self.is_terminal(),
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::FetchingInfo => "fetching info",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Buttons a presentation layer should enable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AvailableActions {
    pub pause: bool,
    pub resume: bool,
    pub cancel: bool,
    pub retry: bool,
}

/// Read-only view of an item for rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub id: JobId,
    pub url: String,
    pub output_dir: PathBuf,
    pub status: DownloadStatus,
    pub status_label: String,
    /// 0.0 to 100.0
    pub progress: f64,
    /// Bytes per second, 0 when not downloading
    pub speed: f64,
    /// Raw token from the tool, e.g. "00:42"
    pub eta: Option<String>,
    pub error: Option<String>,
    pub pid: Option<u32>,
    pub title: Option<String>,
    pub actions: AvailableActions,
}

// ============================================
// Config Types
// ============================================

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default output directory
    pub download_dir: PathBuf,
    /// Program name or path of the download tool (default: "yt-dlp")
    pub ytdlp_program: String,
    /// Queue slots (default: 3)
    pub max_concurrent_downloads: usize,
    /// Queue new items as soon as they are created
    pub auto_start: bool,
    /// How long to wait for an exit status after the output closes
    pub reap_grace_ms: u64,
    pub cache_metadata: bool,
    /// Metadata cache lifetime in seconds (default: 3600)
    pub metadata_ttl: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."), // Set at load time to ~/Downloads
            ytdlp_program: "yt-dlp".into(),
            max_concurrent_downloads: 3,
            auto_start: false,
            reap_grace_ms: 2000,
            cache_metadata: true,
            metadata_ttl: 3600,
        }
    }
}

// ============================================
// Cache Types
// ============================================

/// Cached data with TTL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: i64,
    /// Time-to-live in seconds
    pub ttl: u64,
}
