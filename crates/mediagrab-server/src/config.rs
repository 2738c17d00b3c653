//! Environment configuration with validation.

use std::net::SocketAddr;
use std::path::PathBuf;

use mediagrab_extract::{
    Aria2Config, DenoConfig, ExtractorConfig, GpuConfig, GpuEncoderKind, GpuPreset,
};
use mediagrab_http::{AuthConfig, CorsPolicy, FeatureFlags, HttpConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is required")]
    Missing { var: &'static str },
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Which task store backend `DATABASE_URL` selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseBackend {
    Sqlite(PathBuf),
    Postgres(String),
}

/// Which coordination backend `REDIS_URL` selects. `memory` is for
/// single-node development runs without a Redis server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationBackend {
    Redis(String),
    InMemory,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_address: SocketAddr,
    pub database: DatabaseBackend,
    pub coordination: CoordinationBackend,
    pub download_dir: PathBuf,
    pub max_concurrent_downloads: usize,
    /// Retention in seconds for terminal tasks.
    pub auto_delete_after: u64,
    pub rate_limit_per_minute: u64,
    pub cors: CorsPolicy,
    pub secret_key: String,
    pub auth: AuthConfig,
    pub features: FeatureFlags,
    pub gpu: GpuConfig,
    pub aria2: Aria2Config,
    pub deno: DenoConfig,
    pub ytdlp_proxy: Option<String>,
    pub ytdlp_cookies_file: Option<PathBuf>,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn bool_var(name: &str) -> bool {
    var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn parse_var<T: std::str::FromStr>(
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: name,
            reason: e.to_string(),
        }),
    }
}

impl ServiceConfig {
    /// Read and validate the full configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_var("PORT", 8000)?;
        let bind_address: SocketAddr =
            format!("{host}:{port}")
                .parse()
                .map_err(|_| ConfigError::Invalid {
                    var: "HOST",
                    reason: format!("{host}:{port} is not a socket address"),
                })?;

        let database = match var("DATABASE_URL") {
            Some(url) if url.starts_with("postgres") => DatabaseBackend::Postgres(url),
            Some(url) => {
                let path = url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
                DatabaseBackend::Sqlite(PathBuf::from(path))
            }
            None => DatabaseBackend::Sqlite(PathBuf::from("mediagrab_tasks.db")),
        };

        let coordination = match var("REDIS_URL") {
            Some(url) if url == "memory" => CoordinationBackend::InMemory,
            Some(url) => CoordinationBackend::Redis(url),
            None => CoordinationBackend::Redis("redis://127.0.0.1:6379/0".to_string()),
        };

        let download_dir = PathBuf::from(
            var("DOWNLOAD_DIR").unwrap_or_else(|| "downloads".to_string()),
        );
        std::fs::create_dir_all(&download_dir).map_err(|e| ConfigError::Invalid {
            var: "DOWNLOAD_DIR",
            reason: format!("not creatable: {e}"),
        })?;
        let probe = download_dir.join(".write_probe");
        std::fs::write(&probe, b"ok").map_err(|e| ConfigError::Invalid {
            var: "DOWNLOAD_DIR",
            reason: format!("not writable: {e}"),
        })?;
        let _ = std::fs::remove_file(&probe);

        let max_concurrent_downloads: usize = parse_var("MAX_CONCURRENT_DOWNLOADS", 3)?;
        if !(1..=10).contains(&max_concurrent_downloads) {
            return Err(ConfigError::Invalid {
                var: "MAX_CONCURRENT_DOWNLOADS",
                reason: format!("{max_concurrent_downloads} is outside 1-10"),
            });
        }

        let auto_delete_after: u64 = parse_var("AUTO_DELETE_AFTER", 604_800)?;
        if auto_delete_after < 300 {
            return Err(ConfigError::Invalid {
                var: "AUTO_DELETE_AFTER",
                reason: format!("{auto_delete_after}s is below the 300s minimum"),
            });
        }

        let rate_limit_per_minute: u64 = parse_var("RATE_LIMIT_PER_MINUTE", 3)?;

        let secret_key = var("SECRET_KEY").ok_or(ConfigError::Missing { var: "SECRET_KEY" })?;

        let auth = AuthConfig {
            enabled: bool_var("ENABLE_JWT_AUTH"),
            secret: secret_key.clone(),
            algorithm: var("JWT_ALGORITHM").unwrap_or_else(|| "HS256".to_string()),
            expiration_days: parse_var("JWT_EXPIRATION_DAYS", 30)?,
            issue_password: var("API_KEY_ISSUE_PASSWORD"),
        };
        match auth.algorithm.as_str() {
            "HS256" | "HS384" | "HS512" => {}
            other => {
                return Err(ConfigError::Invalid {
                    var: "JWT_ALGORITHM",
                    reason: format!("unsupported algorithm: {other}"),
                });
            }
        }

        let gpu = GpuConfig {
            enabled: bool_var("ENABLE_GPU_ENCODING"),
            encoder: match var("GPU_ENCODER_TYPE") {
                None => GpuEncoderKind::Auto,
                Some(raw) => GpuEncoderKind::parse(&raw).ok_or(ConfigError::Invalid {
                    var: "GPU_ENCODER_TYPE",
                    reason: format!("{raw} is not auto, nvenc, vaapi or qsv"),
                })?,
            },
            preset: match var("GPU_ENCODER_PRESET") {
                None => GpuPreset::Medium,
                Some(raw) => GpuPreset::parse(&raw).ok_or(ConfigError::Invalid {
                    var: "GPU_ENCODER_PRESET",
                    reason: format!("{raw} is not fast, medium or slow"),
                })?,
            },
        };

        let aria2 = Aria2Config {
            enabled: bool_var("ENABLE_ARIA2"),
            max_connections: parse_var("ARIA2_MAX_CONNECTIONS", 4)?,
            split: parse_var("ARIA2_SPLIT", 4)?,
        };

        let deno = DenoConfig {
            enabled: bool_var("ENABLE_DENO"),
            binary_path: var("DENO_PATH").map(PathBuf::from),
        };

        let features = FeatureFlags {
            video_info: feature_flag("ENABLE_FEATURE_VIDEO_INFO"),
            download: feature_flag("ENABLE_FEATURE_DOWNLOAD"),
            status: feature_flag("ENABLE_FEATURE_STATUS"),
            file_download: feature_flag("ENABLE_FEATURE_FILE_DOWNLOAD"),
            cancel: feature_flag("ENABLE_FEATURE_CANCEL"),
            delete: feature_flag("ENABLE_FEATURE_DELETE"),
            list_tasks: feature_flag("ENABLE_FEATURE_LIST_TASKS"),
            subtitles: feature_flag("ENABLE_FEATURE_SUBTITLES"),
            queue_stats: feature_flag("ENABLE_FEATURE_QUEUE_STATS"),
            progress: feature_flag("ENABLE_FEATURE_PROGRESS"),
        };

        Ok(Self {
            bind_address,
            database,
            coordination,
            download_dir,
            max_concurrent_downloads,
            auto_delete_after,
            rate_limit_per_minute,
            cors: CorsPolicy::parse(&var("CORS_ORIGINS").unwrap_or_else(|| "*".to_string())),
            secret_key,
            auth,
            features,
            gpu,
            aria2,
            deno,
            ytdlp_proxy: var("YTDLP_PROXY"),
            ytdlp_cookies_file: var("YTDLP_COOKIES_FILE").map(PathBuf::from),
        })
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            download_dir: self.download_dir.clone(),
            proxy: self.ytdlp_proxy.clone(),
            cookies_file: self.ytdlp_cookies_file.clone(),
            gpu: self.gpu.clone(),
            aria2: self.aria2.clone(),
            deno: self.deno.clone(),
            ..Default::default()
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            bind_address: self.bind_address,
            cors: self.cors.clone(),
            features: self.features.clone(),
            rate_limit_per_minute: self.rate_limit_per_minute,
            auth: self.auth.clone(),
            download_dir: self.download_dir.clone(),
            ..Default::default()
        }
    }
}

/// Feature flags default to enabled; only an explicit falsy value turns
/// one off.
fn feature_flag(name: &str) -> bool {
    match var(name) {
        None => true,
        Some(raw) => matches!(
            raw.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
    }
}
