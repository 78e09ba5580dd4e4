//! Path utilities for datareel
//!
//! Respects XDG Base Directory Specification

use crate::error::Result;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

const APP_NAME: &str = "datareel";

/// Get cache directory path
/// Respects XDG_CACHE_HOME, defaults to ~/.cache/datareel
pub fn get_cache_dir() -> PathBuf {
    let base = env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(dirs::cache_dir)
        .unwrap_or_else(|| home_dir().join(".cache"));

    base.join(APP_NAME)
}

/// Get metadata cache directory path
pub fn get_metadata_cache_dir() -> PathBuf {
    get_cache_dir().join("metadata")
}

/// Default download directory: ~/Downloads, else home, else "."
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(env::var("HOME").unwrap_or_default()))
}

/// Ensure a directory exists
pub async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).await?;
    Ok(())
}
