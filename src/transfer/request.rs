//! Request description for a single transfer: URL, verb, headers, body,
//! timeout hints. Opaque to the scheduling core; consumed by the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// HTTP verb for a transfer. `Get` is assumed when a job omits the method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
    Options,
}

impl Method {
    /// True for verbs that carry a request body.
    pub fn has_body(self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
        }
    }
}

/// Configuration of one transfer. The core passes this through to the
/// engine unmodified; timeouts are hints for the engine, never
/// reinterpreted by the scheduling layer.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub follow_location: bool,
    pub max_redirects: u32,
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: Method::Get,
            headers: Vec::new(),
            body: None,
            follow_location: true,
            max_redirects: 10,
            timeout: None,
            connect_timeout: None,
        }
    }
}

impl RequestSpec {
    pub fn get(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }
}

/// Merge query parameters into a URL, preserving any query string already
/// present. Returns the URL unchanged when `params` is empty.
pub fn append_query(url: &str, params: &[(&str, &str)]) -> anyhow::Result<String> {
    if params.is_empty() {
        return Ok(url.to_string());
    }
    let mut parsed = url::Url::parse(url)?;
    for (k, v) in params {
        parsed.query_pairs_mut().append_pair(k, v);
    }
    Ok(parsed.to_string())
}

/// Encode parameter pairs as an `application/x-www-form-urlencoded` body.
pub fn form_encode(params: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}
