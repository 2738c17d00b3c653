//! Subprocess manager for the mediagrab download service.
//!
//! Every invocation of the external extractor (yt-dlp) and transcoder
//! (ffmpeg) goes through this crate. Callers never spawn or signal a
//! process directly: [`YtDlpRunner`] owns the child table, parses the
//! progress stream, enforces wall-clock and memory ceilings, and
//! escalates termination from SIGTERM to SIGKILL.
//!
//! The [`MediaRunner`] trait is the seam the scheduler and HTTP layer
//! program against; tests substitute a scripted fake.

pub mod config;
pub mod error;
pub mod formats;
pub mod monitor;
pub mod probe;
pub mod process;
pub mod progress_parse;
pub mod runner;
pub mod transcode;

pub use config::{Aria2Config, DenoConfig, ExtractorConfig, GpuConfig, GpuEncoderKind, GpuPreset};
pub use error::ExtractError;
pub use formats::{Container, QualityHint};
pub use probe::{MediaFormat, MediaInfo};
pub use runner::{DownloadArtifact, DownloadSpec, MediaRunner, RunnerHooks, YtDlpRunner};
