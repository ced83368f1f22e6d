//! Credential forwarding.
//!
//! The inbound `Authorization` header is reduced to its token (a leading
//! `Bearer` scheme is removed, case-insensitively, along with surrounding
//! whitespace) and re-emitted as `Bearer <token>` on the outbound request.
//! A missing header stays missing. Nothing here can fail: a header that is
//! not valid text yields an empty token.

use std::fmt;

use axum::http::header::{HeaderMap, HeaderValue, AUTHORIZATION};

const BEARER: &str = "Bearer";

/// Token extracted from an inbound request, alive for one request only.
#[derive(Clone, PartialEq, Eq)]
pub struct ForwardedCredential {
    token: String,
}

impl ForwardedCredential {
    /// Extract the credential from inbound headers, if an `Authorization`
    /// header is present.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(AUTHORIZATION)?;
        let token = value.to_str().map(strip_scheme).unwrap_or_default();
        Some(Self {
            token: token.to_string(),
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// The outbound header value, `Bearer <token>`.
    pub fn header_value(&self) -> HeaderValue {
        HeaderValue::from_str(&format!("{BEARER} {}", self.token))
            .unwrap_or_else(|_| HeaderValue::from_static("Bearer "))
    }
}

impl fmt::Debug for ForwardedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardedCredential")
            .field("token_len", &self.token.len())
            .finish()
    }
}

/// Remove a leading `Bearer` scheme (any case) and surrounding whitespace.
pub fn strip_scheme(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.get(..BEARER.len()) {
        Some(scheme) if scheme.eq_ignore_ascii_case(BEARER) => {
            let rest = &trimmed[BEARER.len()..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                rest.trim_start()
            } else {
                trimmed
            }
        }
        _ => trimmed,
    }
}

/// Rewrite the `Authorization` header of an outbound request in place.
///
/// Returns the credential that was forwarded, if any.
pub fn forward_credential(headers: &mut HeaderMap) -> Option<ForwardedCredential> {
    let credential = ForwardedCredential::from_headers(headers);
    match &credential {
        Some(credential) => {
            headers.insert(AUTHORIZATION, credential.header_value());
        }
        None => {
            headers.remove(AUTHORIZATION);
        }
    }
    credential
}
