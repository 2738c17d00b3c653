//! Mapping the error taxonomy onto HTTP responses.

use hyper::StatusCode;
use serde::Serialize;

use crate::body::{ApiBody, full};
use mediagrab_types::{ErrorKind, ServiceError};

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error_code: &'a str,
    detail: &'a str,
}

/// HTTP status for each error kind. Internal detail never leaks: the
/// generic 500 body carries only the stable code.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidState => StatusCode::BAD_REQUEST,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::ResourceExceeded => StatusCode::INSUFFICIENT_STORAGE,
        ErrorKind::External => StatusCode::BAD_GATEWAY,
        ErrorKind::PathTraversal => StatusCode::FORBIDDEN,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(err: &ServiceError) -> hyper::Response<ApiBody> {
    // Disabled features reject with 403 regardless of their kind.
    let status = if err.code == "FEATURE_DISABLED" {
        StatusCode::FORBIDDEN
    } else {
        status_for(err.kind)
    };
    let detail = match err.kind {
        ErrorKind::Internal => "internal server error",
        _ => err.message.as_str(),
    };
    let body = serde_json::to_vec(&ErrorBody {
        error_code: err.code,
        detail,
    })
    .unwrap_or_else(|_| b"{\"error_code\":\"INTERNAL_ERROR\"}".to_vec());

    hyper::Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(full(body))
        .unwrap_or_else(|_| hyper::Response::new(full("")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ErrorKind::RateLimited),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status_for(ErrorKind::Auth), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::PathTraversal), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(ErrorKind::Internal),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_detail_not_leaked() {
        let err = ServiceError::internal("secret connection string");
        let response = error_response(&err);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
