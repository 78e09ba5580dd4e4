//! datareel library
//!
//! A download engine that drives yt-dlp: builds its command line, supervises
//! the child process, parses its progress output and tracks each job through
//! its lifecycle.

pub mod core;
pub mod error;
pub mod storage;
pub mod types;
pub mod utils;

pub use crate::core::{Downloader, DownloaderRegistry, Engine, JobUpdate, UpdateKind, YtDlp};
pub use crate::error::{DataReelError, ErrorCode, Result};
pub use crate::types::{Config, DownloadOptions, DownloadStatus, ItemSnapshot, JobId};
