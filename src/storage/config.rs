//! Configuration loading
//!
//! Defaults merged with environment overrides. Nothing is written back.

use crate::error::{DataReelError, Result};
use crate::types::Config;
use crate::utils::paths::default_download_dir;
use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_DOWNLOAD_DIR: &str = "DATAREEL_DOWNLOAD_DIR";
pub const ENV_YTDLP: &str = "DATAREEL_YTDLP";
pub const ENV_MAX_CONCURRENT: &str = "DATAREEL_MAX_CONCURRENT";
pub const ENV_AUTO_START: &str = "DATAREEL_AUTO_START";
pub const ENV_REAP_GRACE_MS: &str = "DATAREEL_REAP_GRACE_MS";
pub const ENV_NO_CACHE: &str = "DATAREEL_NO_CACHE";

/// Load configuration from the process environment
pub fn load_config() -> Result<Config> {
    config_from(|key| std::env::var(key).ok())
}

/// Build a config from defaults plus whatever `lookup` returns for each
/// override variable.
pub fn config_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config = Config {
        download_dir: default_download_dir(),
        ..Config::default()
    };

    let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(dir) = lookup(ENV_DOWNLOAD_DIR) {
        config.download_dir = PathBuf::from(dir);
    }
    if let Some(program) = lookup(ENV_YTDLP) {
        config.ytdlp_program = program;
    }
    if let Some(value) = lookup(ENV_MAX_CONCURRENT) {
        config.max_concurrent_downloads = parse_number(ENV_MAX_CONCURRENT, &value)?;
        if config.max_concurrent_downloads == 0 {
            return Err(DataReelError::InvalidConfig(format!(
                "{} must be at least 1",
                ENV_MAX_CONCURRENT
            )));
        }
    }
    if let Some(value) = lookup(ENV_AUTO_START) {
        config.auto_start = parse_flag(ENV_AUTO_START, &value)?;
    }
    if let Some(value) = lookup(ENV_REAP_GRACE_MS) {
        config.reap_grace_ms = parse_number(ENV_REAP_GRACE_MS, &value)?;
    }
    if let Some(value) = lookup(ENV_NO_CACHE) {
        config.cache_metadata = !parse_flag(ENV_NO_CACHE, &value)?;
    }

    Ok(config)
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DataReelError::InvalidConfig(format!("{}: not a number: {}", key, value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DataReelError::InvalidConfig(format!(
            "{}: not a boolean: {}",
            key, value
        ))),
    }
}
