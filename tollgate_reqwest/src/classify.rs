//! Recognizing responses that reject an expired access token
//!
//! A bare `401 Unauthorized` is never taken as expiry on its own. Servers use
//! it for revoked, malformed, and missing credentials as well, none of which
//! a refresh can fix.

use http::{header, StatusCode};
use serde_json::Value;

use crate::HttpResponse;

/// Decides whether an unsuccessful response means the access token expired
pub trait ExpiryClassifier: Send + Sync {
    /// Whether `response` reports an expired access token
    fn is_expired(&self, response: &HttpResponse) -> bool;
}

impl<F> ExpiryClassifier for F
where
    F: Fn(&HttpResponse) -> bool + Send + Sync,
{
    fn is_expired(&self, response: &HttpResponse) -> bool {
        self(response)
    }
}

/// Expiry reported as a `401` whose JSON body carries a known error code
///
/// ```
/// use tollgate_reqwest::JsonErrorCode;
///
/// // {"code": 40101, "message": "token expired"}
/// let classifier = JsonErrorCode::new("/code", 40101);
/// ```
#[derive(Clone, Debug)]
pub struct JsonErrorCode {
    pointer: String,
    expected: Value,
}

impl JsonErrorCode {
    /// Matches when the value at the JSON `pointer` equals `expected`
    pub fn new(pointer: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self {
            pointer: pointer.into(),
            expected: expected.into(),
        }
    }
}

impl ExpiryClassifier for JsonErrorCode {
    fn is_expired(&self, response: &HttpResponse) -> bool {
        if response.status() != StatusCode::UNAUTHORIZED {
            return false;
        }

        match serde_json::from_slice::<Value>(response.body()) {
            Ok(body) => body.pointer(&self.pointer) == Some(&self.expected),
            Err(_) => false,
        }
    }
}

/// Expiry reported as a `401` with a bearer challenge of `error="invalid_token"`
///
/// ```http
/// HTTP/1.1 401 Unauthorized
/// www-authenticate: Bearer error="invalid_token" error_description="token expired"
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct BearerInvalidToken;

impl ExpiryClassifier for BearerInvalidToken {
    fn is_expired(&self, response: &HttpResponse) -> bool {
        response.status() == StatusCode::UNAUTHORIZED
            && response
                .headers()
                .get_all(header::WWW_AUTHENTICATE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .any(is_invalid_token_challenge)
    }
}

/// Each header value is read as a single challenge
fn is_invalid_token_challenge(challenge: &str) -> bool {
    let Some((scheme, params)) = challenge.trim().split_once(' ') else {
        return false;
    };

    scheme.eq_ignore_ascii_case("bearer")
        && params
            .split(|c: char| c == ',' || c.is_ascii_whitespace())
            .filter_map(|param| param.split_once('='))
            .any(|(name, value)| {
                name.eq_ignore_ascii_case("error") && value.trim_matches('"') == "invalid_token"
            })
}
