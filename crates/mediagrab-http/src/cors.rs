//! CORS header application driven by the configured origin policy.

use hyper::HeaderMap;
use hyper::header::HeaderValue;

use crate::config::CorsPolicy;

const ALLOW_METHODS: &str = "GET, POST, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Accept, Authorization";
const MAX_AGE: &str = "86400";

/// Apply CORS headers for the request's origin. With an origin list,
/// unknown origins get no CORS headers at all.
pub fn apply_cors_headers(headers: &mut HeaderMap, policy: &CorsPolicy, origin: Option<&str>) {
    let allow_origin = match (policy, origin) {
        (CorsPolicy::Any, _) => Some("*".to_string()),
        (CorsPolicy::Origins(_), Some(origin)) if policy.allows(origin) => {
            Some(origin.to_string())
        }
        _ => None,
    };

    let Some(allow_origin) = allow_origin else {
        return;
    };
    let Ok(origin_value) = HeaderValue::from_str(&allow_origin) else {
        return;
    };

    headers.insert("Access-Control-Allow-Origin", origin_value);
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert("Access-Control-Max-Age", HeaderValue::from_static(MAX_AGE));
    if allow_origin != "*" {
        headers.insert(
            "Access-Control-Allow-Credentials",
            HeaderValue::from_static("true"),
        );
    }
}
