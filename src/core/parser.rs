//! Progress-line parsing for yt-dlp output
//!
//! Raw bytes arrive from the merged stdout/stderr pipe in arbitrary chunks.
//! [`LineBuffer`] reassembles them into lines and [`parse_progress_line`]
//! extracts percentage, speed and ETA from lines such as:
//!
//! ```text
//! [download]  45.2% of 123.45MiB at 1.23MiB/s ETA 00:42
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

/// Tag that marks a progress line
pub const PROGRESS_TAG: &str = "[download]";

/// Longest partial line kept between chunks before it is dropped
const MAX_PARTIAL_LINE: usize = 64 * 1024;

static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([0-9]+(?:\.[0-9]+)?)%").expect("valid percent regex"));

static SPEED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)at\s+([0-9]+(?:\.[0-9]+)?)\s*(\S*)").expect("valid speed regex")
});

static ETA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)ETA\s+(\S+)").expect("valid eta regex"));

/// Fields found on one progress line. `None` means "not present on this line".
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// 0.0 to 100.0
    pub percent: Option<f64>,
    /// Bytes per second
    pub speed: Option<f64>,
    pub eta: Option<String>,
}

/// Parse one line of tool output.
///
/// Returns `None` for anything that is not a progress line; the tool prints
/// plenty of those and they are not errors.
pub fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let tag_at = line.find(PROGRESS_TAG)?;
    if !line.contains('%') {
        return None;
    }

    let after_tag = &line[tag_at + PROGRESS_TAG.len()..];
    let percent = PERCENT_RE
        .captures(after_tag)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|p| p.clamp(0.0, 100.0));

    let speed = SPEED_RE.captures(line).and_then(|c| {
        let value = c[1].parse::<f64>().ok()?;
        speed_multiplier(&c[2]).map(|m| value * m)
    });

    let eta = ETA_RE.captures(line).map(|c| c[1].to_string());

    Some(ProgressUpdate {
        percent,
        speed,
        eta,
    })
}

/// Bytes-per-unit for the rate suffixes yt-dlp prints. Anything else is ignored.
fn speed_multiplier(unit: &str) -> Option<f64> {
    if unit.starts_with("MiB") {
        Some(1024.0 * 1024.0)
    } else if unit.starts_with("KiB") {
        Some(1024.0)
    } else {
        None
    }
}

/// Reassembles complete lines from arbitrarily split chunks.
///
/// Bytes are appended and complete lines drained strictly in arrival order; a
/// trailing partial line is held until the chunk that completes it.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes.
    ///
    /// Both `\n` and `\r` end a line, since yt-dlp rewrites its progress line
    /// with carriage returns when `--newline` is not honoured. Empty lines are
    /// dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        for (i, byte) in self.partial.iter().enumerate() {
            if *byte == b'\n' || *byte == b'\r' {
                if i > start {
                    lines.push(String::from_utf8_lossy(&self.partial[start..i]).into_owned());
                }
                start = i + 1;
            }
        }
        self.partial.drain(..start);

        if self.partial.len() > MAX_PARTIAL_LINE {
            tracing::warn!(
                bytes = self.partial.len(),
                "Dropping oversized partial output line"
            );
            self.partial.clear();
        }

        lines
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }

    pub fn clear(&mut self) {
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_progress_line() {
        let update =
            parse_progress_line("[download]  45.2% of 123.45MiB at 1.23MiB/s ETA 00:42").unwrap();
        assert_eq!(update.percent, Some(45.2));
        let speed = update.speed.unwrap();
        assert!((speed - 1.23 * 1024.0 * 1024.0).abs() < 1e-6);
        assert_eq!(update.eta.as_deref(), Some("00:42"));
    }

    #[test]
    fn test_kib_speed() {
        let update =
            parse_progress_line("[download]   3.0% of 10.00MiB at 512.00KiB/s ETA 00:19").unwrap();
        assert_eq!(update.speed, Some(512.0 * 1024.0));
    }

    #[test]
    fn test_unit_after_space() {
        let update =
            parse_progress_line("[download]  45.2% of 123.45MiB at 1.23 MiB/s ETA 00:42").unwrap();
        let speed = update.speed.unwrap();
        assert!((speed - 1.23 * 1024.0 * 1024.0).abs() < 1e-6);
        assert_eq!(update.eta.as_deref(), Some("00:42"));
    }

    #[test]
    fn test_unknown_unit_leaves_speed_unset() {
        let update =
            parse_progress_line("[download]  45.2% of 123.45MiB at 1.23XiB/s ETA 00:42").unwrap();
        assert_eq!(update.percent, Some(45.2));
        assert_eq!(update.speed, None);
        assert_eq!(update.eta.as_deref(), Some("00:42"));
    }

    #[test]
    fn test_unknown_speed_token() {
        let update =
            parse_progress_line("[download]  12.0% of ~ 5.00MiB at  Unknown B/s ETA Unknown")
                .unwrap();
        assert_eq!(update.percent, Some(12.0));
        assert_eq!(update.speed, None);
        assert_eq!(update.eta.as_deref(), Some("Unknown"));
    }

    #[test]
    fn test_final_line_without_eta() {
        let update = parse_progress_line("[download] 100% of 123.45MiB in 00:01:40").unwrap();
        assert_eq!(update.percent, Some(100.0));
        assert_eq!(update.speed, None);
        assert_eq!(update.eta, None);
    }

    #[test]
    fn test_non_progress_lines() {
        assert!(parse_progress_line("[youtube] dQw4w9WgXcQ: Downloading webpage").is_none());
        assert!(parse_progress_line("[download] Destination: Rick Astley.webm").is_none());
        assert!(parse_progress_line("100% done").is_none());
        assert!(parse_progress_line("").is_none());
    }

    #[test]
    fn test_line_buffer_keeps_partial_line() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"[download]  1.0% of 1MiB\n[download]  2.0% of 1MiB\n[downl");
        assert_eq!(
            lines,
            vec!["[download]  1.0% of 1MiB", "[download]  2.0% of 1MiB"]
        );
        assert_eq!(buffer.pending(), b"[downl");

        let lines = buffer.push(b"oad]  3.0% of 1MiB\n");
        assert_eq!(lines, vec!["[download]  3.0% of 1MiB"]);
        assert!(buffer.pending().is_empty());
    }

    #[test]
    fn test_line_buffer_carriage_returns() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"a\r\nb\rc");
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(buffer.pending(), b"c");
    }

    #[test]
    fn test_line_buffer_split_utf8() {
        let mut buffer = LineBuffer::new();
        let text = "Загрузка\n".as_bytes();
        assert!(buffer.push(&text[..3]).is_empty());
        assert_eq!(buffer.push(&text[3..]), vec!["Загрузка"]);
    }
}
