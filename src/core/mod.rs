//! Core download machinery: argument building, process supervision,
//! progress parsing, item state and the engine that drives them.

pub mod args;
pub mod downloader;
pub mod engine;
pub mod item;
pub mod metadata;
pub mod parser;
pub mod process;
pub mod registry;

pub use downloader::{Downloader, DownloaderRegistry, YtDlp};
pub use engine::{Engine, JobUpdate, UpdateKind};
pub use item::DownloadItem;
pub use registry::JobRegistry;
