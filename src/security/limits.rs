//! Request size and media type checks.
//!
//! Both checks run on headers only, before any body bytes are read. The
//! streamed body is capped separately by the body guard middleware.

use axum::http::{header, HeaderMap, Method};

use crate::security::error::{DefenseError, DefenseResult};

/// Reject a request whose declared `Content-Length` exceeds `max_bytes`.
pub fn check_declared_length(headers: &HeaderMap, max_bytes: usize) -> DefenseResult<()> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    match declared {
        Some(len) if len > max_bytes as u64 => Err(DefenseError::too_large(max_bytes)),
        _ => Ok(()),
    }
}

/// Methods that carry a JSON body.
pub fn expects_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// `application/json` or any `+json` structured syntax suffix.
pub fn is_json_content_type(value: &str) -> bool {
    let essence = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json"
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}

/// Body-carrying requests must declare a JSON content type.
pub fn check_content_type(method: &Method, headers: &HeaderMap) -> DefenseResult<()> {
    if !expects_body(method) {
        return Ok(());
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    match content_type {
        Some(ct) if is_json_content_type(ct) => Ok(()),
        other => Err(DefenseError::unsupported_media_type(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::error::ErrorKind;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_declared_length() {
        let ok = headers(&[(header::CONTENT_LENGTH, "1024")]);
        assert!(check_declared_length(&ok, 1024).is_ok());

        let big = headers(&[(header::CONTENT_LENGTH, "1025")]);
        let err = check_declared_length(&big, 1024).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RequestTooLarge);
        assert_eq!(err.status().as_u16(), 413);

        assert!(check_declared_length(&HeaderMap::new(), 10).is_ok());
    }

    #[test]
    fn test_json_content_types() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("Application/JSON; charset=utf-8"));
        assert!(is_json_content_type("application/geo+json"));
        assert!(!is_json_content_type("text/plain"));
        assert!(!is_json_content_type("application/x-www-form-urlencoded"));
    }

    #[test]
    fn test_content_type_required_for_post() {
        let plain = headers(&[(header::CONTENT_TYPE, "text/plain")]);
        let err = check_content_type(&Method::POST, &plain).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedMediaType);
        assert_eq!(err.status().as_u16(), 415);

        let missing = check_content_type(&Method::PUT, &HeaderMap::new()).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::UnsupportedMediaType);

        assert!(check_content_type(&Method::GET, &plain).is_ok());
        let json = headers(&[(header::CONTENT_TYPE, "application/json")]);
        assert!(check_content_type(&Method::POST, &json).is_ok());
    }
}
