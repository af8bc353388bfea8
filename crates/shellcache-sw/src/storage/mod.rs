//! Cache storage: named buckets of request key → stored response.
//!
//! ```text
//! CacheStorage (caches)
//!     └── bucket "<app>-v<version>"        (core)
//!     └── bucket "<app>-v<version>-pages"  (pages)
//!             └── key (GET URL, no fragment) → CachedResponse
//! ```
//!
//! Every write is a full-key overwrite. `put_all` is atomic: either every
//! entry lands or none does.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use shellcache_common::Result;
use shellcache_net::{Response, ResponseType};
use url::Url;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Normalized cache key for a GET request: the URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Normalized request key.
    pub key: String,

    /// Final response URL, after redirects.
    pub response_url: Option<String>,

    /// Response status.
    pub status: u16,

    /// Response status text.
    pub status_text: String,

    /// Response headers, in order, repeats allowed.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CachedResponse {
    /// Snapshot a network response under `key`.
    pub fn from_response(key: impl Into<String>, response: &Response) -> Self {
        Self {
            key: key.into(),
            response_url: response.url.as_ref().map(|u| u.to_string()),
            status: response.status.as_u16(),
            status_text: response.status_text.clone(),
            headers: response
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
            body: response.body().to_vec(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response to hand back to the page.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        Response::from_parts(
            self.response_url
                .as_deref()
                .and_then(|u| Url::parse(u).ok()),
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            self.status_text.clone(),
            headers,
            ResponseType::Basic,
            Bytes::from(self.body.clone()),
        )
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Raw key-value storage behind [`CacheStorage`].
///
/// Implementations must make `put_all` atomic and report bucket names in
/// creation order.
pub trait CacheBackend: Send + Sync {
    /// All bucket names, oldest first.
    fn bucket_names(&self) -> Result<Vec<String>>;

    /// Create a bucket if it does not exist.
    fn create_bucket(&mut self, name: &str) -> Result<()>;

    /// Delete a bucket and all its entries. Returns whether it existed.
    fn delete_bucket(&mut self, name: &str) -> Result<bool>;

    /// Look up one entry.
    fn get(&self, bucket: &str, key: &str) -> Result<Option<CachedResponse>>;

    /// Insert or overwrite one entry.
    fn put(&mut self, bucket: &str, entry: CachedResponse) -> Result<()>;

    /// Insert or overwrite many entries, all or nothing.
    fn put_all(&mut self, bucket: &str, entries: Vec<CachedResponse>) -> Result<()>;

    /// Keys stored in a bucket.
    fn keys(&self, bucket: &str) -> Result<Vec<String>>;
}

/// Cache storage (the `caches` global).
pub struct CacheStorage {
    backend: Box<dyn CacheBackend>,
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage").finish_non_exhaustive()
    }
}

impl Default for CacheStorage {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl CacheStorage {
    /// Create storage over a backend.
    pub fn new(backend: impl CacheBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Ephemeral in-memory storage.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Open a cache (creates if it doesn't exist).
    pub fn open(&mut self, name: &str) -> Result<Cache<'_>> {
        self.backend.create_bucket(name)?;
        Ok(Cache {
            name: name.to_string(),
            storage: self,
        })
    }

    /// Check if a cache exists.
    pub fn has(&self, name: &str) -> Result<bool> {
        Ok(self.backend.bucket_names()?.iter().any(|n| n == name))
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> Result<bool> {
        self.backend.delete_bucket(name)
    }

    /// All cache names, oldest first.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.backend.bucket_names()
    }

    /// Match across caches: `preferred` buckets first, in the given order,
    /// then every other bucket oldest first.
    pub fn match_request(&self, key: &str, preferred: &[&str]) -> Result<Option<CachedResponse>> {
        let names = self.backend.bucket_names()?;
        let ordered = preferred
            .iter()
            .copied()
            .filter(|p| names.iter().any(|n| n.as_str() == *p))
            .chain(
                names
                    .iter()
                    .map(String::as_str)
                    .filter(|n| !preferred.contains(n)),
            );

        for name in ordered {
            if let Some(entry) = self.backend.get(name, key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

/// An open cache bucket.
pub struct Cache<'a> {
    name: String,
    storage: &'a mut CacheStorage,
}

impl Cache<'_> {
    /// Bucket name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request key in this bucket only.
    pub fn match_request(&self, key: &str) -> Result<Option<CachedResponse>> {
        self.storage.backend.get(&self.name, key)
    }

    /// Add or overwrite an entry.
    pub fn put(&mut self, entry: CachedResponse) -> Result<()> {
        self.storage.backend.put(&self.name, entry)
    }

    /// Add entries atomically.
    pub fn put_all(&mut self, entries: Vec<CachedResponse>) -> Result<()> {
        self.storage.backend.put_all(&self.name, entries)
    }

    /// Get all keys (URLs).
    pub fn keys(&self) -> Result<Vec<String>> {
        self.storage.backend.keys(&self.name)
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    /// Whether the bucket has no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
