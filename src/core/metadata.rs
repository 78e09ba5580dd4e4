//! Metadata parsing for `yt-dlp --dump-json` output, plus thumbnail retrieval

use crate::error::{DataReelError, Result};
use crate::types::{VideoFormat, VideoMetadata};
use crate::utils::text::{format_duration, format_size};
use serde::Deserialize;

/// First quality choice, meaning "let the tool pick"
pub const BEST_QUALITY: &str = "Best Quality";

const USER_AGENT: &str = concat!("datareel/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct RawInfo {
    title: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    description: Option<String>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
    format_note: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    format_note: Option<String>,
    resolution: Option<String>,
    ext: Option<String>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
}

/// Parse the single JSON object printed by `--dump-json`.
pub fn parse_metadata(json: &str) -> Result<VideoMetadata> {
    let raw: RawInfo = serde_json::from_str(json.trim())?;

    let formats: Vec<VideoFormat> = raw
        .formats
        .into_iter()
        .filter_map(|f| {
            let format_id = f.format_id?;
            let ext = f.ext.unwrap_or_default();
            // Storyboards are preview sprites, not media
            if ext == "mhtml" {
                return None;
            }
            Some(VideoFormat {
                format_id,
                format_note: f.format_note,
                resolution: f.resolution,
                ext,
                filesize: f.filesize.or(f.filesize_approx),
            })
        })
        .collect();

    let available_qualities = quality_options(&formats);

    Ok(VideoMetadata {
        title: raw.title,
        uploader: raw.uploader,
        duration: raw
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| format_duration(d as u64)),
        thumbnail_url: raw.thumbnail,
        description: raw.description,
        filesize: raw.filesize.or(raw.filesize_approx),
        format_note: raw.format_note,
        formats,
        available_qualities,
    })
}

/// Human-readable choices for `formats`, led by [`BEST_QUALITY`].
///
/// Empty when there are no formats; otherwise choice `i + 1` describes
/// `formats[i]`.
pub fn quality_options(formats: &[VideoFormat]) -> Vec<String> {
    if formats.is_empty() {
        return Vec::new();
    }
    std::iter::once(BEST_QUALITY.to_string())
        .chain(formats.iter().map(format_label))
        .collect()
}

fn format_label(format: &VideoFormat) -> String {
    let name = format
        .format_note
        .as_deref()
        .or(format.resolution.as_deref())
        .unwrap_or(&format.format_id);

    let mut label = format!("{} - {}", name, format.ext.to_uppercase());
    if let (Some(note), Some(resolution)) = (&format.format_note, &format.resolution) {
        if note != resolution {
            label.push_str(&format!(" [{}]", resolution));
        }
    }
    if let Some(size) = format.filesize {
        label.push_str(&format!(" (~{})", format_size(size)));
    }
    label
}

impl VideoMetadata {
    /// Format for a quality choice; `None` for "Best Quality" or an
    /// out-of-range index.
    pub fn format_for_choice(&self, index: usize) -> Option<&VideoFormat> {
        index.checked_sub(1).and_then(|i| self.formats.get(i))
    }
}

/// Download a thumbnail image.
pub async fn fetch_thumbnail(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(DataReelError::Metadata(format!(
            "thumbnail HTTP {}: {}",
            response.status(),
            url
        )));
    }

    Ok(response.bytes().await?.to_vec())
}
