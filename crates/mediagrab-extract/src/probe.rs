//! Metadata probe: extractor "describe only" mode.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::ExtractError;

/// One selectable format reported by the extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFormat {
    pub format_id: String,
    pub resolution: String,
    pub ext: String,
    pub filesize: Option<u64>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
}

/// Resolved metadata for a probed URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub thumbnail: Option<String>,
    /// Seconds.
    pub duration: f64,
    pub view_count: u64,
    pub like_count: u64,
    pub uploader: String,
    pub upload_date: Option<String>,
    pub formats: Vec<MediaFormat>,
    /// Descending, e.g. ["1080p", "720p"].
    pub available_qualities: Vec<String>,
    /// Audio container extensions seen in the format list.
    pub available_audio_formats: Vec<String>,
}

const MAX_FORMATS: usize = 30;
const QUALITY_ORDER: [&str; 8] = [
    "2160p", "1440p", "1080p", "720p", "480p", "360p", "240p", "144p",
];

/// Parse the extractor's `--dump-json` output into [`MediaInfo`].
pub fn parse_probe_output(raw: &str) -> Result<MediaInfo, ExtractError> {
    let info: Value = serde_json::from_str(raw)
        .map_err(|e| ExtractError::ProbeFailed(format!("invalid metadata JSON: {e}")))?;

    let mut formats = Vec::new();
    let mut qualities = BTreeSet::new();
    let mut audio_formats = BTreeSet::new();
    let mut seen = BTreeSet::new();

    if let Some(list) = info.get("formats").and_then(Value::as_array) {
        for f in list {
            let Some(format_id) = f.get("format_id").and_then(Value::as_str) else {
                continue;
            };

            let height = f.get("height").and_then(Value::as_u64);
            if let Some(h) = height {
                qualities.insert(format!("{h}p"));
            }

            let acodec = f.get("acodec").and_then(Value::as_str);
            let ext = f
                .get("ext")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            if let Some(ac) = acodec {
                if ac != "none" {
                    audio_formats.insert(ext.clone());
                }
            }

            let key = format!("{format_id}_{ext}");
            if seen.contains(&key) || formats.len() >= MAX_FORMATS {
                continue;
            }
            seen.insert(key);

            let resolution = f
                .get("format_note")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| match height {
                    Some(h) => format!("{h}p"),
                    None => "audio".to_string(),
                });

            formats.push(MediaFormat {
                format_id: format_id.to_string(),
                resolution,
                ext,
                filesize: f.get("filesize").and_then(Value::as_u64),
                fps: f.get("fps").and_then(Value::as_f64),
                vcodec: f.get("vcodec").and_then(Value::as_str).map(str::to_string),
                acodec: acodec.map(str::to_string),
            });
        }
    }

    let available_qualities = QUALITY_ORDER
        .iter()
        .filter(|q| qualities.contains(**q))
        .map(|q| q.to_string())
        .collect();

    Ok(MediaInfo {
        title: info
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string(),
        thumbnail: info
            .get("thumbnail")
            .and_then(Value::as_str)
            .map(str::to_string),
        duration: info.get("duration").and_then(Value::as_f64).unwrap_or(0.0),
        view_count: info.get("view_count").and_then(Value::as_u64).unwrap_or(0),
        like_count: info.get("like_count").and_then(Value::as_u64).unwrap_or(0),
        uploader: info
            .get("uploader")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string(),
        upload_date: info
            .get("upload_date")
            .and_then(Value::as_str)
            .map(str::to_string),
        formats,
        available_qualities,
        available_audio_formats: audio_formats.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn probe_json() -> String {
        json!({
            "title": "A Test Clip",
            "thumbnail": "https://example.test/t.jpg",
            "duration": 201.5,
            "view_count": 1234,
            "like_count": 56,
            "uploader": "someone",
            "upload_date": "20250110",
            "formats": [
                {"format_id": "140", "ext": "m4a", "acodec": "mp4a.40.2", "vcodec": "none"},
                {"format_id": "137", "ext": "mp4", "height": 1080, "acodec": "none",
                 "vcodec": "avc1", "fps": 30.0, "filesize": 1000000},
                {"format_id": "22", "ext": "mp4", "height": 720, "acodec": "mp4a.40.2",
                 "vcodec": "avc1"},
                // duplicate id+ext is dropped
                {"format_id": "22", "ext": "mp4", "height": 720, "acodec": "mp4a.40.2"},
                {"ext": "mp4", "height": 480}
            ]
        })
        .to_string()
    }

    #[test]
    fn test_parse_probe_output() {
        let info = parse_probe_output(&probe_json()).unwrap();
        assert_eq!(info.title, "A Test Clip");
        assert_eq!(info.duration, 201.5);
        assert_eq!(info.formats.len(), 3);
        assert_eq!(info.available_qualities, vec!["1080p", "720p"]);
        assert_eq!(info.available_audio_formats, vec!["m4a", "mp4"]);
        assert_eq!(info.formats[1].resolution, "1080p");
        assert_eq!(info.formats[0].resolution, "audio");
    }

    #[test]
    fn test_parse_probe_defaults() {
        let info = parse_probe_output("{}").unwrap();
        assert_eq!(info.title, "Unknown");
        assert_eq!(info.duration, 0.0);
        assert!(info.formats.is_empty());
    }

    #[test]
    fn test_parse_probe_invalid_json() {
        assert!(matches!(
            parse_probe_output("not json"),
            Err(ExtractError::ProbeFailed(_))
        ));
    }

    #[test]
    fn test_format_cap() {
        let formats: Vec<Value> = (0..50)
            .map(|i| json!({"format_id": format!("f{i}"), "ext": "mp4"}))
            .collect();
        let raw = json!({"title": "x", "formats": formats}).to_string();
        let info = parse_probe_output(&raw).unwrap();
        assert_eq!(info.formats.len(), 30);
    }
}
