//! HTTP layer configuration.

use std::net::SocketAddr;

/// CORS origin policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsPolicy {
    /// `*` - allowed, but the server logs a warning at startup.
    Any,
    Origins(Vec<String>),
}

impl CorsPolicy {
    /// Parse the comma-separated `CORS_ORIGINS` value.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == "*" || trimmed.is_empty() {
            return CorsPolicy::Any;
        }
        CorsPolicy::Origins(
            trimmed
                .split(',')
                .map(|origin| origin.trim().trim_end_matches('/').to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
        )
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            CorsPolicy::Any => true,
            CorsPolicy::Origins(origins) => {
                origins.iter().any(|o| o == origin.trim_end_matches('/'))
            }
        }
    }
}

/// One boolean per user-facing endpoint; disabled means 403.
#[derive(Debug, Clone)]
pub struct FeatureFlags {
    pub video_info: bool,
    pub download: bool,
    pub status: bool,
    pub file_download: bool,
    pub cancel: bool,
    pub delete: bool,
    pub list_tasks: bool,
    pub subtitles: bool,
    pub queue_stats: bool,
    pub progress: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            video_info: true,
            download: true,
            status: true,
            file_download: true,
            cancel: true,
            delete: true,
            list_tasks: true,
            subtitles: true,
            queue_stats: true,
            progress: true,
        }
    }
}

/// Bearer auth configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub secret: String,
    /// HS256 unless configured otherwise.
    pub algorithm: String,
    pub expiration_days: i64,
    /// Password gating `POST /api/auth/issue-key`.
    pub issue_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: String::new(),
            algorithm: "HS256".to_string(),
            expiration_days: 30,
            issue_password: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind_address: SocketAddr,
    pub max_body_size: usize,
    pub cors: CorsPolicy,
    pub features: FeatureFlags,
    pub rate_limit_per_minute: u64,
    pub auth: AuthConfig,
    pub download_dir: std::path::PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8000".parse().expect("static socket addr"),
            max_body_size: 1024 * 1024,
            cors: CorsPolicy::Any,
            features: FeatureFlags::default(),
            rate_limit_per_minute: 3,
            auth: AuthConfig::default(),
            download_dir: std::path::PathBuf::from("downloads"),
        }
    }
}
