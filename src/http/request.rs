//! Request id helpers.
//!
//! Ids are assigned by `SetRequestIdLayer` as early as possible and echoed on
//! the response by `PropagateRequestIdLayer`.

use axum::http::HeaderMap;

/// Header carrying the request id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// The request id assigned to a request, if any.
pub fn request_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_id_lookup() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id(&headers), None);
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        assert_eq!(request_id(&headers), Some("abc-123"));
    }
}
