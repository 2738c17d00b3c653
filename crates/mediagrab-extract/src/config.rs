//! Extractor/transcoder configuration.
//!
//! Config flags that drive argument assembly are enumerated option
//! unions; the assembly code switches on the enum, never on raw strings.

use std::path::PathBuf;
use std::time::Duration;

/// GPU encoder family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuEncoderKind {
    /// Probe for NVIDIA, then VAAPI, then Intel QSV.
    Auto,
    Nvenc,
    Vaapi,
    Qsv,
}

impl GpuEncoderKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Some(GpuEncoderKind::Auto),
            "nvenc" => Some(GpuEncoderKind::Nvenc),
            "vaapi" => Some(GpuEncoderKind::Vaapi),
            "qsv" => Some(GpuEncoderKind::Qsv),
            _ => None,
        }
    }
}

/// GPU encoder preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuPreset {
    Fast,
    Medium,
    Slow,
}

impl GpuPreset {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Some(GpuPreset::Fast),
            "medium" => Some(GpuPreset::Medium),
            "slow" => Some(GpuPreset::Slow),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GpuPreset::Fast => "fast",
            GpuPreset::Medium => "medium",
            GpuPreset::Slow => "slow",
        }
    }
}

/// GPU-accelerated encoding options.
#[derive(Debug, Clone)]
pub struct GpuConfig {
    pub enabled: bool,
    pub encoder: GpuEncoderKind,
    pub preset: GpuPreset,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            encoder: GpuEncoderKind::Auto,
            preset: GpuPreset::Medium,
        }
    }
}

/// Multi-connection external downloader (aria2c) options.
#[derive(Debug, Clone)]
pub struct Aria2Config {
    pub enabled: bool,
    pub max_connections: u32,
    pub split: u32,
}

impl Default for Aria2Config {
    fn default() -> Self {
        Self {
            enabled: false,
            max_connections: 4,
            split: 4,
        }
    }
}

/// Deno JavaScript runtime pass-through for extractor plugins.
#[derive(Debug, Clone, Default)]
pub struct DenoConfig {
    pub enabled: bool,
    pub binary_path: Option<PathBuf>,
}

/// Full subprocess-manager configuration.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Artefact root; all outputs and transients land directly in it.
    pub download_dir: PathBuf,
    pub ytdlp_bin: String,
    pub ffmpeg_bin: String,
    pub proxy: Option<String>,
    pub cookies_file: Option<PathBuf>,
    pub gpu: GpuConfig,
    pub aria2: Aria2Config,
    pub deno: DenoConfig,
    /// RSS ceiling for a child process.
    pub max_memory_bytes: u64,
    /// Resource poll cadence.
    pub monitor_interval: Duration,
    pub probe_timeout: Duration,
    pub download_timeout: Duration,
    pub transcode_timeout: Duration,
    pub subtitle_timeout: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            ytdlp_bin: "yt-dlp".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            proxy: None,
            cookies_file: None,
            gpu: GpuConfig::default(),
            aria2: Aria2Config::default(),
            deno: DenoConfig::default(),
            max_memory_bytes: 2 * 1024 * 1024 * 1024,
            monitor_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(3600),
            transcode_timeout: Duration::from_secs(14_400),
            subtitle_timeout: Duration::from_secs(60),
        }
    }
}
