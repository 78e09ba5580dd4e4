//! Error types for datareel

use crate::types::{DownloadStatus, DownloaderKind};
use thiserror::Error;

/// Coarse classification of failures, for presentation layers that only
/// need to decide how to render an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Caller errors
    InvalidInput,
    InvalidState,
    UnknownJob,

    // Dependency errors
    MissingDependency,

    // Process errors
    SpawnError,
    SignalError,
    ToolError,

    // System errors
    NetworkError,
    ParseError,
    FileError,
}

/// Main error type for datareel
#[derive(Error, Debug)]
pub enum DataReelError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unknown job: {0}")]
    UnknownJob(crate::types::JobId),

    #[error("No downloader registered for {0}")]
    NoDownloader(DownloaderKind),

    #[error("Download is already running")]
    AlreadyDownloading,

    #[error("Cannot {action} a download that is {from}")]
    InvalidTransition {
        from: DownloadStatus,
        action: &'static str,
    },

    #[error("No process attached to this download")]
    NoProcess,

    #[error("Failed to deliver {signal} to process {pid}: {source}")]
    Signal {
        signal: &'static str,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create output pipe: {0}")]
    Pipe(#[source] std::io::Error),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Download is still running; cancel it first")]
    StillRunning,

    #[error("Missing dependency: {0}. Please install it.")]
    MissingDependency(String),

    #[error("Failed to fetch metadata: {0}")]
    Metadata(String),

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DataReelError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl(_) | Self::InvalidConfig(_) => ErrorCode::InvalidInput,
            Self::AlreadyDownloading
            | Self::InvalidTransition { .. }
            | Self::NoProcess
            | Self::StillRunning => ErrorCode::InvalidState,
            Self::UnknownJob(_) => ErrorCode::UnknownJob,
            Self::NoDownloader(_) | Self::MissingDependency(_) => ErrorCode::MissingDependency,
            Self::Pipe(_) | Self::Spawn(_) => ErrorCode::SpawnError,
            Self::Signal { .. } => ErrorCode::SignalError,
            Self::Tool { .. } | Self::Metadata(_) => ErrorCode::ToolError,
            Self::Http(_) => ErrorCode::NetworkError,
            Self::Json(_) => ErrorCode::ParseError,
            Self::File(_) => ErrorCode::FileError,
        }
    }
}

pub type Result<T> = std::result::Result<T, DataReelError>;
