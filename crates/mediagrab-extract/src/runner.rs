//! Supervised extractor invocations behind the [`MediaRunner`] seam.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ExtractorConfig;
use crate::error::ExtractError;
use crate::formats::{self, Container, QualityHint};
use crate::monitor::{self, ResourceMonitor};
use crate::probe::{self, MediaInfo};
use crate::process::ProcessTable;
use crate::progress_parse;
use crate::transcode;
use mediagrab_types::ProgressTick;

/// Everything the runner needs to execute one download attempt.
#[derive(Debug, Clone)]
pub struct DownloadSpec {
    pub task_id: Uuid,
    pub url: String,
    pub container: Container,
    pub format_id: Option<String>,
    pub quality: Option<QualityHint>,
    pub custom_title: Option<String>,
    pub embed_thumbnail: bool,
    pub thumbnail_url: Option<String>,
    /// Media duration from the probe, for post-step progress mapping.
    pub duration: Option<f64>,
}

impl DownloadSpec {
    /// Whether the attempt continues into the short post-processing
    /// phase (title tagging / cover embed) after the extractor exits.
    pub fn wants_post_processing(&self) -> bool {
        self.container.is_audio()
            && (self.custom_title.is_some()
                || (self.embed_thumbnail
                    && self.container.supports_cover_art()
                    && self.thumbnail_url.is_some()))
    }
}

/// Callbacks out of a running attempt.
pub struct RunnerHooks {
    /// Called once, with the child pid, right after spawn.
    pub on_spawn: Box<dyn Fn(u32) + Send + Sync>,
    /// Called for every parsed progress tick.
    pub on_progress: Box<dyn Fn(ProgressTick) + Send + Sync>,
}

impl RunnerHooks {
    pub fn noop() -> Self {
        Self {
            on_spawn: Box::new(|_| {}),
            on_progress: Box::new(|_| {}),
        }
    }
}

/// Result of a successful download attempt.
#[derive(Debug, Clone)]
pub struct DownloadArtifact {
    pub file_path: PathBuf,
    pub file_size: u64,
    pub filename: String,
}

/// The seam between the scheduler and the external tools. Production
/// uses [`YtDlpRunner`]; tests substitute a scripted fake.
#[async_trait]
pub trait MediaRunner: Send + Sync {
    /// Resolve metadata without downloading. Capped at the probe budget.
    async fn probe(&self, url: &str) -> Result<MediaInfo, ExtractError>;

    /// Fetch the media, streaming progress through `hooks`.
    async fn run_download(
        &self,
        spec: &DownloadSpec,
        hooks: RunnerHooks,
    ) -> Result<DownloadArtifact, ExtractError>;

    /// Short post step (tagging, cover art). Failures are swallowed.
    async fn post_process(
        &self,
        spec: &DownloadSpec,
        artifact: &DownloadArtifact,
        hooks: RunnerHooks,
    );

    /// Terminate the child for `task_id` and delete partial output.
    /// Returns `false` when nothing was running.
    async fn cancel(&self, task_id: Uuid) -> Result<bool, ExtractError>;

    /// Subtitle text for the URL, or `None` when unavailable.
    async fn fetch_subtitles(&self, url: &str, lang: &str)
    -> Result<Option<String>, ExtractError>;
}

/// Production runner invoking yt-dlp and ffmpeg.
pub struct YtDlpRunner {
    config: ExtractorConfig,
    processes: Arc<ProcessTable>,
    http: reqwest::Client,
}

impl YtDlpRunner {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config,
            processes: Arc::new(ProcessTable::new()),
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Shared child table, exposed for liveness checks.
    pub fn process_table(&self) -> Arc<ProcessTable> {
        Arc::clone(&self.processes)
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.ytdlp_bin);
        for (key, value) in formats::deno_env(&self.config.deno) {
            cmd.env(key, value);
        }
        if let Some(ref proxy) = self.config.proxy {
            cmd.arg("--proxy").arg(proxy);
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    fn find_output(&self, task_id: Uuid) -> Option<DownloadArtifact> {
        let prefix = format!("{task_id}.");
        let thumb = format!("{task_id}_thumb.jpg");
        let entries = std::fs::read_dir(&self.config.download_dir).ok()?;

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || name == thumb || name.ends_with(".part") {
                continue;
            }
            let path = entry.path();
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let size = metadata.len();
            if size == 0 {
                continue;
            }
            return Some(DownloadArtifact {
                file_path: path,
                file_size: size,
                filename: name,
            });
        }
        None
    }
}

#[async_trait]
impl MediaRunner for YtDlpRunner {
    async fn probe(&self, url: &str) -> Result<MediaInfo, ExtractError> {
        let mut cmd = self.base_command();
        cmd.arg("--dump-json")
            .arg("--no-playlist")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ExtractError::SpawnFailed(e.to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::SpawnFailed("stdout unavailable".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractError::SpawnFailed("stderr unavailable".into()))?;

        let gathered = tokio::time::timeout(self.config.probe_timeout, async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (_, _, status) = tokio::join!(
                stdout.read_to_end(&mut out),
                stderr.read_to_end(&mut err),
                child.wait()
            );
            (out, err, status)
        })
        .await;

        let (out, err, status) = match gathered {
            Ok(result) => result,
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ExtractError::Timeout(self.config.probe_timeout.as_secs()));
            }
        };

        let status = status.map_err(ExtractError::Io)?;
        if !status.success() {
            let stderr_text = String::from_utf8_lossy(&err);
            let summary: String = stderr_text.chars().take(200).collect();
            return Err(ExtractError::ProbeFailed(summary));
        }

        probe::parse_probe_output(&String::from_utf8_lossy(&out))
    }

    async fn run_download(
        &self,
        spec: &DownloadSpec,
        hooks: RunnerHooks,
    ) -> Result<DownloadArtifact, ExtractError> {
        let selection = formats::select_format(spec.container, spec.format_id.as_deref(), spec.quality);
        let output_template = self
            .config
            .download_dir
            .join(format!("{}.%(ext)s", spec.task_id));

        let mut cmd = self.base_command();
        cmd.arg("-f")
            .arg(&selection.selector)
            .arg("--no-playlist")
            .arg("--newline")
            .arg("-o")
            .arg(&output_template);

        cmd.args(formats::aria2_args(&self.config.aria2));
        cmd.args(formats::audio_postprocess_args(
            spec.container,
            spec.embed_thumbnail,
        ));

        if spec.container.is_video() {
            let gpu_args = formats::gpu_encoder_args(&self.config.gpu);
            if !gpu_args.is_empty() {
                cmd.arg("--postprocessor-args").arg(gpu_args.join(" "));
            }
        }

        if let Some(ref cookies) = self.config.cookies_file {
            cmd.arg("--cookies").arg(cookies);
        }

        cmd.arg(&spec.url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ExtractError::SpawnFailed(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| ExtractError::SpawnFailed("child exited before pid read".into()))?;

        let cancelled = self.processes.register(spec.task_id, pid);
        (hooks.on_spawn)(pid);
        info!(task_id = %spec.task_id, pid, selector = %selection.selector,
              "download process started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::SpawnFailed("stdout unavailable".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractError::SpawnFailed("stderr unavailable".into()))?;

        // Drain stderr concurrently so a chatty child can't fill the pipe
        // buffer and stall.
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let deadline = tokio::time::Instant::now() + self.config.download_timeout;
        let mut lines = BufReader::new(stdout).lines();
        let mut resource_monitor = ResourceMonitor::new(pid, self.config.max_memory_bytes);
        let mut monitor_interval = tokio::time::interval(self.config.monitor_interval);
        monitor_interval.tick().await; // immediate first tick

        let failure: Option<ExtractError> = loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(tick) = progress_parse::parse_download_line(&line) {
                            (hooks.on_progress)(tick);
                        } else {
                            debug!(task_id = %spec.task_id, "{line}");
                        }
                    }
                    Ok(None) => break None,
                    Err(err) => {
                        warn!(task_id = %spec.task_id, "stdout read error: {err}");
                        break None;
                    }
                },
                _ = monitor_interval.tick() => {
                    if let Err(msg) = resource_monitor.check() {
                        break Some(ExtractError::ResourceExceeded(msg));
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    break Some(ExtractError::Timeout(self.config.download_timeout.as_secs()));
                }
            }
        };

        if let Some(err) = failure {
            warn!(task_id = %spec.task_id, "killing child: {err}");
            let _ = child.start_kill();
            let _ = child.wait().await;
            self.processes.deregister(spec.task_id);
            let _ = stderr_task.await;
            monitor::remove_task_files(&self.config.download_dir, &spec.task_id.to_string());
            return Err(err);
        }

        let status = child.wait().await.map_err(ExtractError::Io)?;
        self.processes.deregister(spec.task_id);

        if cancelled.load(Ordering::SeqCst) {
            info!(task_id = %spec.task_id, "download cancelled");
            monitor::remove_task_files(&self.config.download_dir, &spec.task_id.to_string());
            return Err(ExtractError::Cancelled);
        }

        if !status.success() {
            let stderr_buf = stderr_task.await.unwrap_or_default();
            let stderr_text = String::from_utf8_lossy(&stderr_buf);
            let summary: String = stderr_text.chars().take(500).collect();
            monitor::remove_task_files(&self.config.download_dir, &spec.task_id.to_string());
            return Err(ExtractError::External(summary));
        }

        match self.find_output(spec.task_id) {
            Some(artifact) => {
                info!(task_id = %spec.task_id, file = %artifact.filename,
                      size = artifact.file_size, "download finished");
                Ok(artifact)
            }
            None => Err(ExtractError::OutputMissing),
        }
    }

    async fn post_process(
        &self,
        spec: &DownloadSpec,
        artifact: &DownloadArtifact,
        hooks: RunnerHooks,
    ) {
        transcode::apply_audio_tags(&self.config, &self.http, spec, artifact, &hooks).await;
    }

    async fn cancel(&self, task_id: Uuid) -> Result<bool, ExtractError> {
        let found = self.processes.terminate(task_id).await;
        if found {
            monitor::remove_task_files(&self.config.download_dir, &task_id.to_string());
        }
        Ok(found)
    }

    async fn fetch_subtitles(
        &self,
        url: &str,
        lang: &str,
    ) -> Result<Option<String>, ExtractError> {
        let output_template = self.config.download_dir.join("temp_sub.%(ext)s");

        let mut cmd = self.base_command();
        cmd.arg("--write-subs")
            .arg("--sub-lang")
            .arg(lang)
            .arg("--skip-download")
            .arg("--sub-format")
            .arg("srt")
            .arg("-o")
            .arg(&output_template)
            .arg(url)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ExtractError::SpawnFailed(e.to_string()))?;

        match tokio::time::timeout(self.config.subtitle_timeout, child.wait()).await {
            Ok(status) => {
                status.map_err(ExtractError::Io)?;
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ExtractError::Timeout(self.config.subtitle_timeout.as_secs()));
            }
        }

        // The extractor writes temp_sub.<lang>.srt; read and remove it.
        let entries = std::fs::read_dir(&self.config.download_dir)?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("temp_sub.") && name.ends_with(".srt") {
                let content = std::fs::read_to_string(entry.path())?;
                if let Err(err) = std::fs::remove_file(entry.path()) {
                    warn!("failed to remove transient subtitle file {name}: {err}");
                }
                return Ok(Some(content));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(container: Container) -> DownloadSpec {
        DownloadSpec {
            task_id: Uuid::new_v4(),
            url: "https://example.test/v/abc".to_string(),
            container,
            format_id: None,
            quality: None,
            custom_title: None,
            embed_thumbnail: false,
            thumbnail_url: None,
            duration: None,
        }
    }

    #[test]
    fn test_wants_post_processing() {
        let mut s = spec(Container::Mp3);
        assert!(!s.wants_post_processing());

        s.custom_title = Some("My Title".to_string());
        assert!(s.wants_post_processing());

        let mut cover = spec(Container::Mp3);
        cover.embed_thumbnail = true;
        cover.thumbnail_url = Some("https://example.test/t.jpg".to_string());
        assert!(cover.wants_post_processing());

        // cover art without a thumbnail url is a no-op
        let mut no_thumb = spec(Container::Mp3);
        no_thumb.embed_thumbnail = true;
        assert!(!no_thumb.wants_post_processing());

        // video targets never post-process here
        let mut video = spec(Container::Mp4);
        video.custom_title = Some("x".to_string());
        assert!(!video.wants_post_processing());
    }

    #[tokio::test]
    async fn test_find_output_skips_partials_and_thumbs() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExtractorConfig {
            download_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let runner = YtDlpRunner::new(config);
        let id = Uuid::new_v4();

        std::fs::write(dir.path().join(format!("{id}.mp4.part")), b"partial").unwrap();
        std::fs::write(dir.path().join(format!("{id}_thumb.jpg")), b"thumb").unwrap();
        assert!(runner.find_output(id).is_none());

        std::fs::write(dir.path().join(format!("{id}.mp4")), b"full output").unwrap();
        let artifact = runner.find_output(id).unwrap();
        assert_eq!(artifact.filename, format!("{id}.mp4"));
        assert_eq!(artifact.file_size, 11);
    }

    #[tokio::test]
    async fn test_cancel_without_running_child() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExtractorConfig {
            download_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let runner = YtDlpRunner::new(config);
        assert!(!runner.cancel(Uuid::new_v4()).await.unwrap());
    }
}
