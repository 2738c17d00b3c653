//! Formats table and extractor argument assembly.
//!
//! Maps the requested container family, optional explicit format code
//! and optional quality hint to the extractor's selector string, the
//! expected output extension and any post-processing flags.

use std::collections::HashMap;
use std::path::Path;

use crate::config::{Aria2Config, DenoConfig, GpuConfig, GpuEncoderKind, GpuPreset};

/// Accepted container/codec families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    Mp3,
    Mp4,
    Webm,
    Wav,
    Flac,
    Aac,
    /// Best audio stream, m4a output.
    Audio,
    /// Best video stream only.
    Video,
    /// Best combined streams.
    Best,
}

impl Container {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Some(Container::Mp3),
            "mp4" => Some(Container::Mp4),
            "webm" => Some(Container::Webm),
            "wav" => Some(Container::Wav),
            "flac" => Some(Container::Flac),
            "aac" => Some(Container::Aac),
            "audio" => Some(Container::Audio),
            "video" => Some(Container::Video),
            "best" => Some(Container::Best),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Container::Mp3 => "mp3",
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
            Container::Wav => "wav",
            Container::Flac => "flac",
            Container::Aac => "aac",
            Container::Audio => "audio",
            Container::Video => "video",
            Container::Best => "best",
        }
    }

    /// Audio-only targets trigger the extract-and-re-encode post step.
    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            Container::Mp3 | Container::Wav | Container::Flac | Container::Aac | Container::Audio
        )
    }

    /// Containers that accept an embedded cover frame.
    pub fn supports_cover_art(&self) -> bool {
        matches!(self, Container::Mp3)
    }

    /// Video targets are eligible for GPU-accelerated encoding.
    pub fn is_video(&self) -> bool {
        matches!(
            self,
            Container::Mp4 | Container::Webm | Container::Video | Container::Best
        )
    }

    /// Audio format passed to the extractor's `--audio-format`.
    fn audio_format(&self) -> Option<&'static str> {
        match self {
            Container::Mp3 => Some("mp3"),
            Container::Wav => Some("wav"),
            Container::Flac => Some("flac"),
            Container::Aac => Some("aac"),
            _ => None,
        }
    }
}

/// Quality hint: `best`, `worst` or a height bound like `720p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityHint {
    Best,
    Worst,
    Height(u32),
}

impl QualityHint {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "best" => Some(QualityHint::Best),
            "worst" => Some(QualityHint::Worst),
            other => {
                let height = other.strip_suffix('p')?;
                height.parse::<u32>().ok().map(QualityHint::Height)
            }
        }
    }
}

/// Resolved selector and output extension for one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSelection {
    pub selector: String,
    pub ext: &'static str,
}

/// Resolve the extractor selector from the request parameters.
///
/// Precedence: explicit format code (verbatim, with a best-effort
/// fallback chain appended), then quality hint, then the per-container
/// default map.
pub fn select_format(
    container: Container,
    format_id: Option<&str>,
    quality: Option<QualityHint>,
) -> FormatSelection {
    if let Some(code) = format_id {
        // "137+140"-style codes merge separate streams into an mp4 mux.
        let ext = if code.contains('+') {
            "mp4"
        } else {
            default_ext(container)
        };
        return FormatSelection {
            selector: format!("{code}/bestvideo+bestaudio/best"),
            ext,
        };
    }

    if let Some(hint) = quality {
        let selector = match hint {
            QualityHint::Best => "bestvideo+bestaudio/best".to_string(),
            QualityHint::Worst => "worstvideo+worstaudio/worst".to_string(),
            QualityHint::Height(height) => format!(
                "bestvideo[height<={height}]+bestaudio/best[height<={height}]"
            ),
        };
        return FormatSelection {
            selector,
            ext: "mp4",
        };
    }

    let (selector, ext) = match container {
        Container::Mp3 => ("bestaudio", "mp3"),
        Container::Mp4 => (
            "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
            "mp4",
        ),
        Container::Best => ("bestvideo+bestaudio/best", "mp4"),
        Container::Audio => ("bestaudio", "m4a"),
        Container::Video => ("bestvideo", "mp4"),
        Container::Webm => (
            "bestvideo[ext=webm]+bestaudio[ext=webm]/best[ext=webm]",
            "webm",
        ),
        Container::Wav => ("bestaudio", "wav"),
        Container::Flac => ("bestaudio", "flac"),
        Container::Aac => ("bestaudio", "aac"),
    };
    FormatSelection {
        selector: selector.to_string(),
        ext,
    }
}

fn default_ext(container: Container) -> &'static str {
    match container {
        Container::Mp3 => "mp3",
        Container::Wav => "wav",
        Container::Flac => "flac",
        Container::Aac => "aac",
        Container::Audio => "m4a",
        Container::Webm => "webm",
        Container::Mp4 | Container::Video | Container::Best => "mp4",
    }
}

/// Post-processing flags for audio targets (`-x --audio-format ...`,
/// plus cover embedding for the extractor when requested).
pub fn audio_postprocess_args(container: Container, embed_thumbnail: bool) -> Vec<String> {
    let Some(audio_format) = container.audio_format() else {
        return Vec::new();
    };
    let mut args = vec![
        "-x".to_string(),
        "--audio-format".to_string(),
        audio_format.to_string(),
    ];
    if embed_thumbnail {
        args.push("--embed-thumbnail".to_string());
    }
    args
}

/// Transcoder flags for GPU-accelerated encoding, empty when disabled or
/// no device is available. Detection order: NVIDIA, then VAAPI, then QSV.
pub fn gpu_encoder_args(gpu: &GpuConfig) -> Vec<String> {
    if !gpu.enabled {
        return Vec::new();
    }

    let encoder = match gpu.encoder {
        GpuEncoderKind::Auto => match detect_gpu_encoder() {
            Some(kind) => kind,
            None => return Vec::new(),
        },
        explicit => explicit,
    };

    encoder_args(encoder, gpu.preset)
}

fn detect_gpu_encoder() -> Option<GpuEncoderKind> {
    if which::which("nvidia-smi").is_ok() {
        Some(GpuEncoderKind::Nvenc)
    } else if Path::new("/dev/dri").exists() {
        Some(GpuEncoderKind::Vaapi)
    } else {
        None
    }
}

fn encoder_args(encoder: GpuEncoderKind, preset: GpuPreset) -> Vec<String> {
    match encoder {
        GpuEncoderKind::Nvenc => vec![
            "-c:v".to_string(),
            "h264_nvenc".to_string(),
            "-preset".to_string(),
            preset.as_str().to_string(),
            "-b:v".to_string(),
            "5M".to_string(),
        ],
        GpuEncoderKind::Vaapi => vec![
            "-vaapi_device".to_string(),
            "/dev/dri/renderD128".to_string(),
            "-vf".to_string(),
            "format=nv12,hwupload".to_string(),
            "-c:v".to_string(),
            "h264_vaapi".to_string(),
            "-b:v".to_string(),
            "5M".to_string(),
        ],
        GpuEncoderKind::Qsv => vec![
            "-c:v".to_string(),
            "h264_qsv".to_string(),
            "-preset".to_string(),
            preset.as_str().to_string(),
            "-b:v".to_string(),
            "5M".to_string(),
        ],
        GpuEncoderKind::Auto => Vec::new(),
    }
}

/// External-downloader flags when aria2 is enabled.
pub fn aria2_args(aria2: &Aria2Config) -> Vec<String> {
    if !aria2.enabled {
        return Vec::new();
    }
    vec![
        "--external-downloader".to_string(),
        "aria2c".to_string(),
        "--external-downloader-args".to_string(),
        format!(
            "aria2c:-x {} -s {} -k 1M",
            aria2.max_connections, aria2.split
        ),
    ]
}

/// Environment overrides for extractor children when the Deno runtime
/// is enabled and present.
pub fn deno_env(deno: &DenoConfig) -> HashMap<String, String> {
    let mut env = HashMap::new();
    if !deno.enabled {
        return env;
    }
    let Some(ref path) = deno.binary_path else {
        return env;
    };
    if !path.exists() {
        return env;
    }
    if let Some(dir) = path.parent() {
        let dir_str = dir.to_string_lossy().to_string();
        env.insert("DENO_DIR".to_string(), dir_str.clone());
        let existing = std::env::var("PATH").unwrap_or_default();
        env.insert("PATH".to_string(), format!("{dir_str}:{existing}"));
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_format_code_appends_fallback_chain() {
        let sel = select_format(Container::Mp4, Some("137+140"), None);
        assert_eq!(sel.selector, "137+140/bestvideo+bestaudio/best");
        assert_eq!(sel.ext, "mp4");

        let audio = select_format(Container::Mp3, Some("251"), None);
        assert_eq!(audio.selector, "251/bestvideo+bestaudio/best");
        assert_eq!(audio.ext, "mp3");
    }

    #[test]
    fn test_quality_hints_expand_to_height_bounds() {
        let sel = select_format(Container::Mp4, None, Some(QualityHint::Height(720)));
        assert_eq!(
            sel.selector,
            "bestvideo[height<=720]+bestaudio/best[height<=720]"
        );
        assert_eq!(sel.ext, "mp4");

        assert_eq!(
            select_format(Container::Mp4, None, Some(QualityHint::Best)).selector,
            "bestvideo+bestaudio/best"
        );
        assert_eq!(
            select_format(Container::Mp4, None, Some(QualityHint::Worst)).selector,
            "worstvideo+worstaudio/worst"
        );
    }

    #[test]
    fn test_format_id_takes_precedence_over_quality() {
        let sel = select_format(Container::Mp4, Some("22"), Some(QualityHint::Height(1080)));
        assert!(sel.selector.starts_with("22/"));
    }

    #[test]
    fn test_default_map() {
        assert_eq!(
            select_format(Container::Webm, None, None).selector,
            "bestvideo[ext=webm]+bestaudio[ext=webm]/best[ext=webm]"
        );
        assert_eq!(select_format(Container::Flac, None, None).ext, "flac");
        assert_eq!(select_format(Container::Audio, None, None).ext, "m4a");
    }

    #[test]
    fn test_quality_hint_parse() {
        assert_eq!(QualityHint::parse("best"), Some(QualityHint::Best));
        assert_eq!(QualityHint::parse("1080p"), Some(QualityHint::Height(1080)));
        assert_eq!(QualityHint::parse("1080"), None);
        assert_eq!(QualityHint::parse("ultra"), None);
    }

    #[test]
    fn test_audio_postprocess_args() {
        let args = audio_postprocess_args(Container::Mp3, true);
        assert_eq!(args, vec!["-x", "--audio-format", "mp3", "--embed-thumbnail"]);

        let no_embed = audio_postprocess_args(Container::Flac, false);
        assert_eq!(no_embed, vec!["-x", "--audio-format", "flac"]);

        assert!(audio_postprocess_args(Container::Mp4, true).is_empty());
        // m4a passthrough needs no re-encode flag set.
        assert!(audio_postprocess_args(Container::Audio, false).is_empty());
    }

    #[test]
    fn test_gpu_args_disabled() {
        let gpu = GpuConfig::default();
        assert!(gpu_encoder_args(&gpu).is_empty());
    }

    #[test]
    fn test_gpu_args_explicit_nvenc() {
        let gpu = GpuConfig {
            enabled: true,
            encoder: GpuEncoderKind::Nvenc,
            preset: GpuPreset::Fast,
        };
        let args = gpu_encoder_args(&gpu);
        assert_eq!(args[..4], ["-c:v", "h264_nvenc", "-preset", "fast"]);
    }

    #[test]
    fn test_aria2_args() {
        let aria2 = Aria2Config {
            enabled: true,
            max_connections: 8,
            split: 8,
        };
        let args = aria2_args(&aria2);
        assert_eq!(args[0], "--external-downloader");
        assert_eq!(args[3], "aria2c:-x 8 -s 8 -k 1M");

        assert!(aria2_args(&Aria2Config::default()).is_empty());
    }

    #[test]
    fn test_deno_env_disabled_or_missing() {
        assert!(deno_env(&DenoConfig::default()).is_empty());
        let missing = DenoConfig {
            enabled: true,
            binary_path: Some("/nonexistent/deno".into()),
        };
        assert!(deno_env(&missing).is_empty());
    }

    #[test]
    fn test_container_families() {
        assert!(Container::Mp3.is_audio());
        assert!(Container::Mp3.supports_cover_art());
        assert!(!Container::Aac.supports_cover_art());
        assert!(Container::Mp4.is_video());
        assert!(!Container::Mp4.is_audio());
        assert_eq!(Container::parse("MP4"), Some(Container::Mp4));
        assert_eq!(Container::parse("mkv"), None);
    }
}
