//! Progress-line parsing for the extractor and transcoder streams.
//!
//! The extractor is run with `--newline`, one progress report per line:
//!
//! ```text
//! [download]  42.7% of 10.00MiB at 1.23MiB/s ETA 00:42
//! ```
//!
//! The transcoder is run with `-progress pipe:1` and emits
//! `out_time=HH:MM:SS.ff` / `speed=N.Nx` key-value lines; total duration
//! comes from its initial banner.

use std::sync::LazyLock;

use regex::Regex;

use mediagrab_types::ProgressTick;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.\d+)%").expect("percent regex"));
static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"of\s+~?\s*([\d.]+)(KiB|MiB|GiB|B)\b").expect("size regex"));
static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"at\s+([\d.]+)(KiB|MiB|GiB|B)/s").expect("speed regex"));
static FFMPEG_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d+):(\d{2}):(\d{2})\.(\d+)").expect("time regex"));
static FFMPEG_SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"speed=\s*([\d.]+)x").expect("ffmpeg speed regex"));
static FFMPEG_DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2})\.(\d+)").expect("duration regex")
});

fn unit_bytes(value: f64, unit: &str) -> f64 {
    match unit {
        "KiB" => value * 1024.0,
        "MiB" => value * 1024.0 * 1024.0,
        "GiB" => value * 1024.0 * 1024.0 * 1024.0,
        _ => value,
    }
}

/// Parse one extractor stdout line into a progress tick.
///
/// Returns `None` for lines without a percent figure (metadata chatter,
/// post-processing banners).
pub fn parse_download_line(line: &str) -> Option<ProgressTick> {
    let percent: f64 = PERCENT_RE
        .captures(line)?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;

    let bytes_total = SIZE_RE.captures(line).and_then(|c| {
        let value: f64 = c.get(1)?.as_str().parse().ok()?;
        Some(unit_bytes(value, c.get(2)?.as_str()) as u64)
    });

    let speed_bps = SPEED_RE.captures(line).and_then(|c| {
        let value: f64 = c.get(1)?.as_str().parse().ok()?;
        Some(unit_bytes(value, c.get(2)?.as_str()))
    });

    let bytes_done = bytes_total.map(|total| ((percent / 100.0) * total as f64) as u64);

    Some(ProgressTick {
        percent,
        bytes_done,
        bytes_total,
        speed_bps,
        encoder_speed: None,
    })
}

fn hms_to_seconds(h: f64, m: f64, s: f64, frac: &str) -> f64 {
    let fraction: f64 = format!("0.{frac}").parse().unwrap_or(0.0);
    h * 3600.0 + m * 60.0 + s + fraction
}

/// Seconds of media processed so far, from a transcoder progress line.
pub fn parse_transcode_time(line: &str) -> Option<f64> {
    let caps = FFMPEG_TIME_RE.captures(line)?;
    Some(hms_to_seconds(
        caps.get(1)?.as_str().parse().ok()?,
        caps.get(2)?.as_str().parse().ok()?,
        caps.get(3)?.as_str().parse().ok()?,
        caps.get(4)?.as_str(),
    ))
}

/// Realtime ratio from a transcoder `speed=` line.
pub fn parse_transcode_speed(line: &str) -> Option<f64> {
    FFMPEG_SPEED_RE
        .captures(line)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Total duration from the transcoder's initial banner.
pub fn parse_transcode_duration(line: &str) -> Option<f64> {
    let caps = FFMPEG_DURATION_RE.captures(line)?;
    Some(hms_to_seconds(
        caps.get(1)?.as_str().parse().ok()?,
        caps.get(2)?.as_str().parse().ok()?,
        caps.get(3)?.as_str().parse().ok()?,
        caps.get(4)?.as_str(),
    ))
}
