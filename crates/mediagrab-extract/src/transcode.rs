//! Transcoder post-step: audio title tagging and cover-art embedding.
//!
//! Runs after the extractor has produced the audio file. Any failure in
//! here is logged and swallowed; the parent task still completes with
//! the untagged file.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ExtractorConfig;
use crate::progress_parse;
use crate::runner::{DownloadArtifact, DownloadSpec, RunnerHooks};
use mediagrab_types::ProgressTick;

const THUMBNAIL_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Cover frames are scaled to fit this box, preserving aspect ratio.
const COVER_BOX: u32 = 500;

/// Apply the cosmetic title and optional cover art to an audio artifact.
///
/// Progress ticks map the transcoder's position into the 95-100 band so
/// subscribers see the post step advance. Returns normally even when
/// tagging fails.
pub async fn apply_audio_tags(
    config: &ExtractorConfig,
    http: &reqwest::Client,
    spec: &DownloadSpec,
    artifact: &DownloadArtifact,
    hooks: &RunnerHooks,
) {
    let wants_cover = spec.embed_thumbnail
        && spec.container.supports_cover_art()
        && spec.thumbnail_url.is_some();

    if spec.custom_title.is_none() && !wants_cover {
        return;
    }

    let thumb_path = if wants_cover {
        match fetch_thumbnail(config, http, spec).await {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(task_id = %spec.task_id, "cover art fetch failed: {err}");
                None
            }
        }
    } else {
        None
    };

    if let Err(err) = run_tagging(config, spec, artifact, thumb_path.as_deref(), hooks).await {
        warn!(task_id = %spec.task_id, "audio tagging failed: {err}");
    } else {
        info!(task_id = %spec.task_id, "audio tags applied");
    }

    if let Some(thumb) = thumb_path {
        if let Err(err) = std::fs::remove_file(&thumb) {
            warn!("failed to remove transient thumbnail {thumb:?}: {err}");
        }
    }
}

async fn fetch_thumbnail(
    config: &ExtractorConfig,
    http: &reqwest::Client,
    spec: &DownloadSpec,
) -> Result<PathBuf, String> {
    let url = spec
        .thumbnail_url
        .as_deref()
        .ok_or("no thumbnail url")?;

    let response = http
        .get(url)
        .timeout(THUMBNAIL_FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("thumbnail fetch returned {}", response.status()));
    }
    let bytes = response.bytes().await.map_err(|e| e.to_string())?;

    let thumb_path = config
        .download_dir
        .join(format!("{}_thumb.jpg", spec.task_id));
    std::fs::write(&thumb_path, &bytes).map_err(|e| e.to_string())?;
    Ok(thumb_path)
}

async fn run_tagging(
    config: &ExtractorConfig,
    spec: &DownloadSpec,
    artifact: &DownloadArtifact,
    thumb: Option<&Path>,
    hooks: &RunnerHooks,
) -> Result<(), String> {
    let tagged_path = config
        .download_dir
        .join(format!("{}.tagged.{}", spec.task_id, ext_of(&artifact.file_path)));

    let mut cmd = Command::new(&config.ffmpeg_bin);
    cmd.arg("-y").arg("-i").arg(&artifact.file_path);

    if let Some(thumb) = thumb {
        // Scale the cover into the box during the embed; no separate
        // image pipeline needed.
        cmd.arg("-i")
            .arg(thumb)
            .arg("-map")
            .arg("0:a")
            .arg("-map")
            .arg("1:v")
            .arg("-c:a")
            .arg("copy")
            .arg("-c:v")
            .arg("mjpeg")
            .arg("-vf")
            .arg(format!(
                "scale='min({COVER_BOX},iw)':'min({COVER_BOX},ih)':force_original_aspect_ratio=decrease"
            ))
            .arg("-disposition:v:0")
            .arg("attached_pic");
    } else {
        cmd.arg("-c").arg("copy");
    }

    if let Some(ref title) = spec.custom_title {
        cmd.arg("-metadata").arg(format!("title={title}"));
    }
    if spec.container.supports_cover_art() {
        cmd.arg("-id3v2_version").arg("3");
    }
    cmd.arg("-progress")
        .arg("pipe:1")
        .arg(&tagged_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| format!("spawn ffmpeg: {e}"))?;
    let stdout = child.stdout.take().ok_or("ffmpeg stdout unavailable")?;

    let duration = spec.duration.filter(|d| *d > 0.0);
    let mut lines = BufReader::new(stdout).lines();
    let drain = async {
        while let Ok(Some(line)) = lines.next_line().await {
            emit_transcode_tick(&line, duration, hooks);
        }
    };

    let status = tokio::select! {
        status = async { drain.await; child.wait().await } => {
            status.map_err(|e| e.to_string())?
        }
        _ = tokio::time::sleep(config.transcode_timeout) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            let _ = std::fs::remove_file(&tagged_path);
            return Err(format!(
                "transcode exceeded {}s",
                config.transcode_timeout.as_secs()
            ));
        }
    };

    if !status.success() {
        let _ = std::fs::remove_file(&tagged_path);
        return Err(format!("ffmpeg exited with {status}"));
    }

    std::fs::rename(&tagged_path, &artifact.file_path)
        .map_err(|e| format!("replace tagged output: {e}"))?;
    Ok(())
}

fn emit_transcode_tick(line: &str, duration: Option<f64>, hooks: &RunnerHooks) {
    if let Some(banner_duration) = progress_parse::parse_transcode_duration(line) {
        debug!("transcoder reports duration {banner_duration}s");
    }

    let Some(position) = progress_parse::parse_transcode_time(line) else {
        if let Some(speed) = progress_parse::parse_transcode_speed(line) {
            debug!("transcoder speed {speed}x");
        }
        return;
    };

    // Post step occupies the 95-100 band of overall progress.
    let percent = match duration {
        Some(total) => 95.0 + (position / total).min(1.0) * 5.0,
        None => 95.0,
    };
    (hooks.on_progress)(ProgressTick {
        percent,
        bytes_done: None,
        bytes_total: None,
        speed_bps: None,
        encoder_speed: progress_parse::parse_transcode_speed(line),
    });
}

fn ext_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bin".to_string())
}
