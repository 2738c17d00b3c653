//! Request input validation.

use url::Url;
use uuid::Uuid;

use mediagrab_extract::{Container, QualityHint};
use mediagrab_types::ServiceError;

const MAX_URL_LENGTH: usize = 2048;
const MAX_TITLE_LENGTH: usize = 200;

/// Validate a media source URL: http(s), a host, sane length.
pub fn validate_url(raw: &str) -> Result<String, ServiceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_URL_LENGTH {
        return Err(ServiceError::validation("INVALID_URL", "url is empty or too long"));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|_| ServiceError::validation("INVALID_URL", "not a valid URL"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ServiceError::validation(
            "INVALID_URL",
            "only http and https URLs are accepted",
        ));
    }
    if parsed.host_str().is_none() {
        return Err(ServiceError::validation("INVALID_URL", "URL has no host"));
    }
    Ok(trimmed.to_string())
}

pub fn validate_format(raw: &str) -> Result<Container, ServiceError> {
    Container::parse(raw).ok_or_else(|| {
        ServiceError::validation("INVALID_FORMAT", format!("unsupported format: {raw}"))
    })
}

pub fn validate_quality(raw: Option<&str>) -> Result<Option<QualityHint>, ServiceError> {
    match raw {
        None => Ok(None),
        Some(value) => QualityHint::parse(value).map(Some).ok_or_else(|| {
            ServiceError::validation(
                "INVALID_QUALITY",
                format!("quality must be best, worst or <N>p, got {value}"),
            )
        }),
    }
}

pub fn validate_task_id(raw: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw)
        .map_err(|_| ServiceError::validation("INVALID_UUID", "task id must be a UUID"))
}

/// Validate the cosmetic title: bounded, no control characters.
pub fn validate_title(raw: Option<&str>) -> Result<Option<String>, ServiceError> {
    match raw {
        None => Ok(None),
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            if trimmed.len() > MAX_TITLE_LENGTH {
                return Err(ServiceError::validation(
                    "INVALID_TITLE",
                    "title is too long",
                ));
            }
            if trimmed.chars().any(char::is_control) {
                return Err(ServiceError::validation(
                    "INVALID_TITLE",
                    "title contains control characters",
                ));
            }
            Ok(Some(trimmed.to_string()))
        }
    }
}

/// Make a title safe for a `Content-Disposition` filename: strip path
/// separators, quotes and control characters.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.chars().take(MAX_TITLE_LENGTH).collect()
    }
}

/// Subtitle language codes are short and alphanumeric ("en", "pt-BR").
pub fn validate_lang(raw: &str) -> Result<String, ServiceError> {
    let trimmed = raw.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() <= 10
        && trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(ServiceError::validation(
            "INVALID_LANG",
            "language must be a short code like en or pt-BR",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.test/v/abc").is_ok());
        assert!(validate_url("http://example.test/watch?v=1").is_ok());

        assert_eq!(validate_url("not a url").unwrap_err().code, "INVALID_URL");
        assert_eq!(
            validate_url("ftp://example.test/f").unwrap_err().code,
            "INVALID_URL"
        );
        assert_eq!(validate_url("").unwrap_err().code, "INVALID_URL");
        assert_eq!(
            validate_url("file:///etc/passwd").unwrap_err().code,
            "INVALID_URL"
        );
    }

    #[test]
    fn test_validate_format() {
        assert_eq!(validate_format("mp4").unwrap(), Container::Mp4);
        assert_eq!(validate_format("MP3").unwrap(), Container::Mp3);
        assert_eq!(validate_format("mkv").unwrap_err().code, "INVALID_FORMAT");
    }

    #[test]
    fn test_validate_quality() {
        assert_eq!(validate_quality(None).unwrap(), None);
        assert_eq!(
            validate_quality(Some("720p")).unwrap(),
            Some(QualityHint::Height(720))
        );
        assert_eq!(
            validate_quality(Some("8k")).unwrap_err().code,
            "INVALID_QUALITY"
        );
    }

    #[test]
    fn test_validate_task_id() {
        assert!(validate_task_id("3fa2d7ae-1bc8-4f13-9f5a-111213141516").is_ok());
        assert_eq!(
            validate_task_id("not-a-uuid").unwrap_err().code,
            "INVALID_UUID"
        );
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Clip"), "My Clip");
        assert_eq!(sanitize_filename("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename(""), "download");
        assert_eq!(sanitize_filename("..."), "download");
    }

    #[test]
    fn test_validate_lang() {
        assert_eq!(validate_lang("en").unwrap(), "en");
        assert_eq!(validate_lang("pt-BR").unwrap(), "pt-BR");
        assert!(validate_lang("en; rm -rf /").is_err());
        assert!(validate_lang("").is_err());
    }
}
