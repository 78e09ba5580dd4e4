//! yt-dlp argument vector construction

use crate::types::DownloadOptions;
use std::path::Path;

/// Output template used when the caller does not supply one
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Build the yt-dlp argument vector (program name excluded).
///
/// The order is fixed: some yt-dlp flags are position-sensitive, and the URL
/// always comes last.
pub fn build_args(url: &str, output_dir: &Path, options: &DownloadOptions) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    if options.audio_only {
        args.push("-x".into());
    }

    if options.subtitles {
        args.extend(["--write-subs", "--write-auto-subs", "--embed-subs"].map(String::from));
    }

    if options.embed_thumbnail {
        args.push("--embed-thumbnail".into());
    }

    if !options.playlist {
        args.push("--no-playlist".into());
    } else if let Some(max) = options.max_downloads.filter(|max| *max > 0) {
        args.push("--max-downloads".into());
        args.push(max.to_string());
    }

    if let Some(range) = options.time_range.as_ref().filter(|r| !r.start.is_empty()) {
        let end = range
            .end
            .as_deref()
            .filter(|end| !end.is_empty())
            .unwrap_or("inf");
        args.push("--download-sections".into());
        args.push(format!("*{}-{}", range.start, end));
    }

    if let Some(ref format) = options.custom_format {
        if !format.is_empty() {
            args.push("-f".into());
            args.push(format.clone());
        }
    }

    // The stream parser depends on one progress line per update
    args.push("--newline".into());
    args.push("--progress".into());

    let template = options
        .output_template
        .as_deref()
        .unwrap_or(DEFAULT_OUTPUT_TEMPLATE);
    args.push("-o".into());
    args.push(format!("{}/{}", output_dir.display(), template));

    args.push(url.to_string());
    args
}
