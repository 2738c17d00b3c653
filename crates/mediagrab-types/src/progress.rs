//! Progress tick and terminal outcome shapes.

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// One progress datum extracted from a subprocess stdout line.
///
/// Only `percent` is guaranteed; the extractor fills the byte counters
/// and speed when its output carries them. ETA is derived downstream by
/// the progress tracker, never here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressTick {
    /// Percent complete, clamped to [0, 100] by the tracker.
    pub percent: f64,
    pub bytes_done: Option<u64>,
    pub bytes_total: Option<u64>,
    pub speed_bps: Option<f64>,
    /// Transcoder realtime ratio (ffmpeg `speed=N.Nx`).
    pub encoder_speed: Option<f64>,
}

impl ProgressTick {
    pub fn percent_only(percent: f64) -> Self {
        Self {
            percent,
            bytes_done: None,
            bytes_total: None,
            speed_bps: None,
            encoder_speed: None,
        }
    }
}

/// Terminal result of one task attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskOutcome {
    Completed {
        file_path: String,
        file_size: u64,
        filename: String,
    },
    Failed {
        error: ServiceError,
    },
    Cancelled,
}

impl TaskOutcome {
    pub fn failed(error: ServiceError) -> Self {
        TaskOutcome::Failed { error }
    }
}
