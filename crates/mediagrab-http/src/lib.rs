//! HTTP surface for the mediagrab download service.
//!
//! A hand-routed hyper service: JSON request/response, bearer-token
//! auth, per-IP rate limiting, CORS, SSE progress streaming and guarded
//! artefact downloads. All IDs on the wire are canonical hyphenated
//! UUIDs.

pub mod auth;
pub mod body;
pub mod config;
pub mod cors;
pub mod error;
pub mod handlers;
pub mod models;
pub mod server;
pub mod sse;
pub mod validation;

pub use auth::JwtAuth;
pub use config::{AuthConfig, CorsPolicy, FeatureFlags, HttpConfig};
pub use handlers::AppState;
pub use server::HttpServer;
