//! Registry of paywalled resources.
//!
//! Each entry maps a path pattern to a price and a source. A pattern is
//! either an exact path (`doggo.jpg`) or a prefix ending in `/*`
//! (`videos/*`). Lookup prefers an exact match, then the longest prefix.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

use alloy::primitives::U256;
use bytes::Bytes;
use serde::Deserialize;
use url::Url;

use crate::config::ConfigError;

/// Body and content type produced for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBody {
    pub content_type: String,
    pub body: Bytes,
}

impl ContentBody {
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }
}

/// Produces a body from the path remainder after the pattern prefix.
pub type Generator = Arc<dyn Fn(&str) -> ContentBody + Send + Sync>;

#[derive(Clone)]
pub enum ContentSource {
    /// Fixed bytes
    Static(ContentBody),
    /// Computed per request
    Generated(Generator),
    /// Forwarded to `base`, with the path remainder appended
    Upstream(Url),
}

impl fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentSource::Static(body) => f
                .debug_struct("Static")
                .field("content_type", &body.content_type)
                .field("len", &body.body.len())
                .finish(),
            ContentSource::Generated(_) => f.write_str("Generated"),
            ContentSource::Upstream(url) => f.debug_tuple("Upstream").field(url).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaywalledContent {
    pattern: String,
    price: U256,
    source: ContentSource,
}

impl PaywalledContent {
    pub fn new(pattern: &str, price: U256, source: ContentSource) -> Self {
        Self {
            pattern: pattern.trim_start_matches('/').to_string(),
            price,
            source,
        }
    }

    pub fn fixed(pattern: &str, price: U256, body: ContentBody) -> Self {
        Self::new(pattern, price, ContentSource::Static(body))
    }

    pub fn generated<F>(pattern: &str, price: U256, generator: F) -> Self
    where
        F: Fn(&str) -> ContentBody + Send + Sync + 'static,
    {
        Self::new(pattern, price, ContentSource::Generated(Arc::new(generator)))
    }

    pub fn upstream(pattern: &str, price: U256, base: Url) -> Self {
        Self::new(pattern, price, ContentSource::Upstream(base))
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn price(&self) -> U256 {
        self.price
    }

    pub fn source(&self) -> &ContentSource {
        &self.source
    }

    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }

    fn prefix(&self) -> Option<&str> {
        if self.pattern == "*" {
            return Some("");
        }
        self.pattern.strip_suffix("/*")
    }

    /// Part of `path` after the pattern prefix; empty for exact patterns.
    pub fn remainder<'a>(&self, path: &'a str) -> &'a str {
        let path = path.trim_start_matches('/');
        match self.prefix() {
            Some(prefix) => path
                .strip_prefix(prefix)
                .map(|rest| rest.trim_start_matches('/'))
                .unwrap_or(""),
            None => "",
        }
    }
}

#[derive(Debug, Default)]
pub struct ContentRegistry {
    entries: RwLock<Vec<PaywalledContent>>,
}

impl ContentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `content`, replacing any entry with the same pattern.
    pub fn add(&self, content: PaywalledContent) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        tracing::debug!(pattern = %content.pattern, price = %content.price, "content registered");
        entries.retain(|e| e.pattern != content.pattern);
        entries.push(content);
    }

    pub fn lookup(&self, path: &str) -> Option<PaywalledContent> {
        let path = path.trim_start_matches('/');
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());

        if let Some(exact) = entries.iter().find(|e| e.prefix().is_none() && e.pattern == path) {
            return Some(exact.clone());
        }

        entries
            .iter()
            .filter_map(|e| e.prefix().map(|prefix| (prefix, e)))
            .filter(|(prefix, _)| {
                prefix.is_empty()
                    || path == *prefix
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, e)| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn patterns(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|e| e.pattern.clone())
            .collect()
    }
}

/// One entry of a content file. Exactly one of `body`, `file`, `upstream`
/// must be set.
#[derive(Debug, Deserialize)]
struct ContentEntry {
    path: String,
    #[serde(with = "mps::channel::amount")]
    price: U256,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    upstream: Option<String>,
}

/// Load a JSON array of content entries. Relative `file` paths resolve
/// against the content file's directory.
pub fn load_content_file(path: &Path) -> Result<Vec<PaywalledContent>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let entries: Vec<ContentEntry> =
        serde_json::from_str(&raw).map_err(|e| parse_err(e.to_string()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    entries
        .into_iter()
        .map(|entry| {
            let content_type = entry
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let source = match (entry.body, entry.file, entry.upstream) {
                (Some(body), None, None) => {
                    ContentSource::Static(ContentBody::new(content_type, body))
                }
                (None, Some(file), None) => {
                    let file_path = base_dir.join(file);
                    let bytes = std::fs::read(&file_path).map_err(|e| ConfigError::Read {
                        path: file_path.clone(),
                        source: e,
                    })?;
                    ContentSource::Static(ContentBody::new(content_type, bytes))
                }
                (None, None, Some(upstream)) => {
                    let url = Url::parse(&upstream)
                        .map_err(|e| parse_err(format!("{}: invalid upstream: {e}", entry.path)))?;
                    ContentSource::Upstream(url)
                }
                _ => {
                    return Err(parse_err(format!(
                        "{}: exactly one of body, file, upstream is required",
                        entry.path
                    )))
                }
            };
            Ok(PaywalledContent::new(&entry.path, entry.price, source))
        })
        .collect()
}
