//! Live per-task delta streams for SSE subscribers.

use std::collections::HashMap;
use std::pin::Pin;

use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use mediagrab_types::TaskStatus;

/// A boxed stream that is also `Sync`, matching what [`http_body_util::BoxBody`]
/// requires of the streams it wraps. `futures::stream::BoxStream` omits `Sync`
/// on the trait object, so we spell out the bound explicitly here.
pub type SyncBoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + Sync + 'a>>;

/// One delta pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressDelta {
    pub status: TaskStatus,
    pub percent: f64,
    pub speed_bps: Option<f64>,
}

const CHANNEL_CAPACITY: usize = 256;

/// Registry of broadcast channels, one per task with live subscribers.
///
/// Channels are created lazily on first publish or subscribe and dropped
/// when the task reaches a terminal state.
#[derive(Default)]
pub struct StreamHub {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<ProgressDelta>>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, task_id: Uuid) -> broadcast::Sender<ProgressDelta> {
        let mut channels = self.channels.lock();
        channels
            .entry(task_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish a delta. Terminal deltas close the channel afterwards so
    /// subscriber streams terminate.
    pub fn publish(&self, task_id: Uuid, delta: ProgressDelta) {
        let terminal = delta.status.is_terminal();
        let sender = {
            let channels = self.channels.lock();
            channels.get(&task_id).cloned()
        };
        if let Some(sender) = sender {
            // No receivers is fine; the delta is simply dropped.
            let _ = sender.send(delta);
        }
        if terminal {
            self.channels.lock().remove(&task_id);
        }
    }

    /// A finite stream of deltas starting from `initial`. Terminates
    /// after the first terminal delta; a lagging subscriber skips ahead
    /// rather than erroring out.
    pub fn subscribe(
        &self,
        task_id: Uuid,
        initial: ProgressDelta,
    ) -> SyncBoxStream<'static, ProgressDelta> {
        let mut receiver = self.sender(task_id).subscribe();
        let initial_terminal = initial.status.is_terminal();

        let stream = async_stream::stream! {
            yield initial;
            if initial_terminal {
                return;
            }
            loop {
                match receiver.recv().await {
                    Ok(delta) => {
                        let terminal = delta.status.is_terminal();
                        yield delta;
                        if terminal {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(task_id = %task_id, skipped, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        };
        Box::pin(stream)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn delta(status: TaskStatus, percent: f64) -> ProgressDelta {
        ProgressDelta {
            status,
            percent,
            speed_bps: None,
        }
    }

    #[tokio::test]
    async fn test_stream_terminates_on_terminal_delta() {
        let hub = StreamHub::new();
        let id = Uuid::new_v4();

        let stream = hub.subscribe(id, delta(TaskStatus::Downloading, 10.0));
        tokio::pin!(stream);

        // initial snapshot is replayed first
        let first = stream.next().await.unwrap();
        assert_eq!(first.percent, 10.0);

        hub.publish(id, delta(TaskStatus::Downloading, 50.0));
        hub.publish(id, delta(TaskStatus::Completed, 100.0));

        assert_eq!(stream.next().await.unwrap().percent, 50.0);
        let last = stream.next().await.unwrap();
        assert_eq!(last.status, TaskStatus::Completed);
        // terminal delta ends the stream
        assert!(stream.next().await.is_none());
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_terminal_initial_yields_once() {
        let hub = StreamHub::new();
        let id = Uuid::new_v4();

        let stream = hub.subscribe(id, delta(TaskStatus::Cancelled, 30.0));
        tokio::pin!(stream);

        assert_eq!(stream.next().await.unwrap().status, TaskStatus::Cancelled);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let hub = StreamHub::new();
        let id = Uuid::new_v4();
        hub.publish(id, delta(TaskStatus::Downloading, 5.0));
        assert_eq!(hub.channel_count(), 0);
    }
}
