//! Child process resource monitoring via procfs.
//!
//! Polls RSS and CPU time for a running child every 10 seconds. A child
//! over the memory ceiling is reported to the caller, which force-kills
//! it and fails the attempt with `ResourceExceeded`.

use std::path::Path;

use tracing::warn;

/// Point-in-time resource usage of one process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub rss_bytes: u64,
    /// Cumulative user+system CPU time in clock ticks.
    pub cpu_ticks: u64,
}

const PAGE_SIZE: u64 = 4096;

/// Sample `/proc/<pid>`. Returns `None` when the process is gone or the
/// platform has no procfs; the caller treats that as within limits.
pub fn sample(pid: u32) -> Option<ResourceSample> {
    let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_sample(&statm, &stat)
}

fn parse_sample(statm: &str, stat: &str) -> Option<ResourceSample> {
    // statm: size resident shared text lib data dt (pages)
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;

    // stat: the comm field may contain spaces; fields are counted after
    // the closing paren. utime is field 14, stime field 15 (1-indexed).
    let after_comm = stat.rsplit_once(')')?.1;
    let mut fields = after_comm.split_whitespace();
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;

    Some(ResourceSample {
        rss_bytes: resident_pages * PAGE_SIZE,
        cpu_ticks: utime + stime,
    })
}

/// Watches one child against a memory ceiling.
pub struct ResourceMonitor {
    pid: u32,
    max_memory_bytes: u64,
    last_cpu_ticks: Option<u64>,
}

impl ResourceMonitor {
    pub fn new(pid: u32, max_memory_bytes: u64) -> Self {
        Self {
            pid,
            max_memory_bytes,
            last_cpu_ticks: None,
        }
    }

    /// Take one sample. Returns `Err` with a description when the child
    /// is over its memory ceiling.
    pub fn check(&mut self) -> Result<(), String> {
        let Some(sample) = sample(self.pid) else {
            // Process exited or no procfs; nothing to enforce.
            return Ok(());
        };

        if let Some(last) = self.last_cpu_ticks {
            // 100 ticks/s on every Linux we target; only used for the log.
            let busy_pct = (sample.cpu_ticks.saturating_sub(last)) as f64 / 10.0;
            if busy_pct > 95.0 {
                warn!(pid = self.pid, busy_pct, "child process is CPU-saturated");
            }
        }
        self.last_cpu_ticks = Some(sample.cpu_ticks);

        if sample.rss_bytes > self.max_memory_bytes {
            return Err(format!(
                "RSS {} bytes exceeds ceiling {} bytes",
                sample.rss_bytes, self.max_memory_bytes
            ));
        }
        Ok(())
    }
}

/// Clean transient files for a task: the partial output and thumbnail.
pub fn remove_task_files(download_dir: &Path, task_id: &str) {
    let Ok(entries) = std::fs::read_dir(download_dir) else {
        return;
    };
    let prefix = format!("{task_id}.");
    let thumb = format!("{task_id}_thumb.jpg");
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) || name == thumb {
            if let Err(err) = std::fs::remove_file(entry.path()) {
                warn!("failed to remove partial file {name}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample() {
        let statm = "12345 2048 300 50 0 900 0";
        let stat = "999 (yt-dlp worker) S 1 999 999 0 -1 4194560 1000 0 0 0 150 50 0 0 20 0 4 0 100 0 0";
        let sample = parse_sample(statm, stat).unwrap();
        assert_eq!(sample.rss_bytes, 2048 * 4096);
        assert_eq!(sample.cpu_ticks, 200);
    }

    #[test]
    fn test_parse_sample_handles_spaces_in_comm() {
        let statm = "1 1 1 1 0 1 0";
        // comm with parens and spaces must not shift the field count
        let stat = "1 (a (weird) name) R 0 0 0 0 -1 0 0 0 0 0 7 3 0 0 20 0 1 0 0 0 0";
        let sample = parse_sample(statm, stat).unwrap();
        assert_eq!(sample.cpu_ticks, 10);
    }

    #[test]
    fn test_sample_missing_process() {
        // pid 0 never has a procfs entry we can read
        assert!(sample(0).is_none());
    }

    #[test]
    fn test_monitor_over_ceiling() {
        let statm = "12345 1000000 300 50 0 900 0";
        let stat = "999 (x) S 1 9 9 0 -1 0 0 0 0 0 1 1 0 0 20 0 1 0 0 0 0";
        let s = parse_sample(statm, stat).unwrap();
        assert!(s.rss_bytes > 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_remove_task_files() {
        let dir = tempfile::tempdir().unwrap();
        let tid = "3fa2d7ae-0000-0000-0000-000000000000";
        std::fs::write(dir.path().join(format!("{tid}.mp4.part")), b"x").unwrap();
        std::fs::write(dir.path().join(format!("{tid}_thumb.jpg")), b"x").unwrap();
        std::fs::write(dir.path().join("other.mp4"), b"x").unwrap();

        remove_task_files(dir.path(), tid);

        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining, vec!["other.mp4"]);
    }
}
