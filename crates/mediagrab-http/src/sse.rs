//! Server-Sent Events formatting for progress subscriptions.

use mediagrab_progress::ProgressDelta;

/// Format one progress delta as an SSE message.
pub fn format_delta(delta: &ProgressDelta) -> String {
    let data = serde_json::to_string(delta).unwrap_or_else(|_| "{}".to_string());
    format!("event: progress\ndata: {data}\n\n")
}

/// Keep-alive comment per the SSE spec.
pub fn keep_alive() -> String {
    ": keepalive\n\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediagrab_types::TaskStatus;

    #[test]
    fn test_format_delta() {
        let message = format_delta(&ProgressDelta {
            status: TaskStatus::Downloading,
            percent: 42.5,
            speed_bps: Some(1024.0),
        });
        assert!(message.starts_with("event: progress\ndata: "));
        assert!(message.ends_with("\n\n"));
        assert!(message.contains("\"downloading\""));
        assert!(message.contains("42.5"));
    }

    #[test]
    fn test_keep_alive_is_comment() {
        assert!(keep_alive().starts_with(':'));
    }
}
