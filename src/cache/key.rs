//! Cache key derivation.
//!
//! A key is the lowercased request path followed by one `|name:value`
//! segment per query parameter, sorted by name. Repeated parameters are
//! folded into one segment with their values joined by `,` in the order
//! they appeared. Request headers are not part of the key.
//!
//! Decoded names and values have `%`, `|`, `:` and `,` re-escaped so a
//! crafted query cannot render the same key as a different one.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::{Method, Uri};
use url::form_urlencoded;

const SEGMENT_SEPARATOR: char = '|';
const PAIR_SEPARATOR: char = ':';
const VALUE_SEPARATOR: char = ',';

/// Content-derived key for a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from a path and an optional raw query string.
    pub fn new(path: &str, query: Option<&str>) -> Self {
        let mut key = String::with_capacity(path.len() + query.map_or(0, str::len));
        push_escaped(&mut key, &path.to_lowercase(), &['%', SEGMENT_SEPARATOR]);

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(query) = query {
            for (name, value) in form_urlencoded::parse(query.as_bytes()) {
                params
                    .entry(name.into_owned())
                    .or_default()
                    .push(value.into_owned());
            }
        }

        const RESERVED: &[char] = &['%', SEGMENT_SEPARATOR, PAIR_SEPARATOR, VALUE_SEPARATOR];
        for (name, values) in params {
            key.push(SEGMENT_SEPARATOR);
            push_escaped(&mut key, &name, RESERVED);
            key.push(PAIR_SEPARATOR);
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    key.push(VALUE_SEPARATOR);
                }
                push_escaped(&mut key, value, RESERVED);
            }
        }

        Self(key)
    }

    pub fn from_uri(uri: &Uri) -> Self {
        Self::new(uri.path(), uri.query())
    }

    /// Key for a request, or `None` when the method is not cacheable.
    pub fn for_request(method: &Method, uri: &Uri) -> Option<Self> {
        (method == Method::GET).then(|| Self::from_uri(uri))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Append `raw`, percent-encoding every character listed in `reserved`.
fn push_escaped(out: &mut String, raw: &str, reserved: &[char]) {
    for c in raw.chars() {
        if reserved.contains(&c) {
            out.push_str(&format!("%{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
