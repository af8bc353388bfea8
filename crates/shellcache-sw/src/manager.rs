//! Cache manager: install-time population, activation cleanup and the
//! stale-while-revalidate responder.
//!
//! ## Fetch decision
//!
//! ```text
//! request ──► cross-origin / non-GET / excluded path ──► Passthrough
//!    │
//!    ▼
//! cache hit ──► respond cached ─┬─► (background) fetch ─► 200 + basic ─► put core
//!    │                          └─► failures swallowed
//!    ▼ miss
//! fetch ──► 200 + basic ─► put core (background), respond fresh
//!   │  └──► other response ─► respond unstored
//!   ▼ network error
//! navigation ─► cached fallback document, else 408
//! other      ─► 408 Offline
//! ```

use std::sync::Arc;

use futures::future::try_join_all;
use http::{Method, StatusCode};
use shellcache_net::{CredentialsMode, Fetcher, Origin, Request, Response, ResponseType};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::events::ExtendableEvent;
use crate::storage::{cache_key, CacheStorage, CachedResponse};

/// Why a request was left to default networking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BypassReason {
    CrossOrigin,
    NonGet(Method),
    ExcludedPath(String),
}

/// Where a response handed to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Stored entry; a background refresh may be in flight.
    Cache,
    /// Straight from the network.
    Network,
    /// Cached root document served to a failed navigation.
    ShellFallback,
    /// Synthetic `408 Offline`.
    Offline,
}

/// Result of fetch interception.
#[derive(Debug, Clone)]
pub enum FetchDisposition {
    /// Not intercepted; the host performs the request itself.
    Passthrough,
    /// Intercepted and answered.
    Respond {
        response: Response,
        source: ResponseSource,
    },
}

impl FetchDisposition {
    /// The response, if the request was intercepted.
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchDisposition::Passthrough => None,
            FetchDisposition::Respond { response, .. } => Some(response),
        }
    }

    /// Where the response came from, if intercepted.
    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            FetchDisposition::Passthrough => None,
            FetchDisposition::Respond { source, .. } => Some(*source),
        }
    }
}

/// Owns the two versioned buckets of one worker version.
#[derive(Clone)]
pub struct CacheManager {
    config: Arc<CacheConfig>,
    origin: Origin,
    core_name: String,
    pages_name: String,
    storage: Arc<RwLock<CacheStorage>>,
    fetcher: Arc<dyn Fetcher>,
}

impl CacheManager {
    /// Build a manager. The config is validated here.
    pub fn new(
        config: Arc<CacheConfig>,
        storage: Arc<RwLock<CacheStorage>>,
        fetcher: Arc<dyn Fetcher>,
    ) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            origin: config.site_origin()?,
            core_name: config.core_cache_name(),
            pages_name: config.pages_cache_name(),
            config,
            storage,
            fetcher,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn core_cache_name(&self) -> &str {
        &self.core_name
    }

    pub fn pages_cache_name(&self) -> &str {
        &self.pages_name
    }

    /// Shared cache storage.
    pub fn storage(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.storage)
    }

    // ==================== Install ====================

    /// Populate both buckets from their manifests, concurrently.
    ///
    /// Each manifest is all-or-nothing. Any failure fails the install, and
    /// buckets this attempt created are removed again.
    pub async fn install(&self) -> CacheResult<()> {
        info!(
            core = %self.core_name,
            pages = %self.pages_name,
            "Installing cache version"
        );

        let preexisting = {
            let storage = self.storage.read().await;
            [
                storage.has(&self.core_name)?,
                storage.has(&self.pages_name)?,
            ]
        };

        let core = self.populate(
            &self.core_name,
            &self.config.core_manifest,
            CredentialsMode::SameOrigin,
        );
        let pages = self.populate(
            &self.pages_name,
            &self.config.pages_manifest,
            CredentialsMode::Omit,
        );
        match futures::try_join!(core, pages) {
            Ok((core_count, pages_count)) => {
                info!(core_count, pages_count, "Installation complete");
                Ok(())
            }
            Err(err) => {
                let mut storage = self.storage.write().await;
                let buckets = [&self.core_name, &self.pages_name];
                for (name, existed) in buckets.into_iter().zip(preexisting) {
                    if !existed && storage.delete(name)? {
                        debug!(bucket = %name, "Removed bucket of failed install");
                    }
                }
                Err(err)
            }
        }
    }

    async fn populate(
        &self,
        bucket: &str,
        manifest: &[String],
        credentials: CredentialsMode,
    ) -> CacheResult<usize> {
        debug!(bucket, entries = manifest.len(), "Caching manifest");

        let urls = manifest
            .iter()
            .map(|entry| self.config.resolve(entry))
            .collect::<CacheResult<Vec<_>>>()?;

        let fetches = urls.into_iter().map(|url| async move {
            let key = cache_key(&url);
            let request = Request::get(url)
                .credentials(credentials)
                .client_origin(self.origin.clone());
            let response = self
                .fetcher
                .fetch(request)
                .await
                .map_err(|source| CacheError::Network {
                    url: key.clone(),
                    source,
                })?;
            if response.status != StatusCode::OK {
                return Err(CacheError::BadStatus {
                    url: key,
                    status: response.status.as_u16(),
                });
            }
            if response.response_type != ResponseType::Basic {
                return Err(CacheError::NotSameOrigin { url: key });
            }
            Ok(CachedResponse::from_response(key, &response))
        });

        let entries = match try_join_all(fetches).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(bucket, error = %err, "Manifest fetch failed, nothing stored");
                return Err(err);
            }
        };

        let count = entries.len();
        self.storage
            .write()
            .await
            .open(bucket)?
            .put_all(entries)?;
        Ok(count)
    }

    /// Whether both buckets hold every manifest entry.
    pub async fn is_installed(&self) -> CacheResult<bool> {
        let mut storage = self.storage.write().await;
        for (bucket, manifest) in [
            (&self.core_name, &self.config.core_manifest),
            (&self.pages_name, &self.config.pages_manifest),
        ] {
            if !storage.has(bucket)? {
                return Ok(false);
            }
            let cache = storage.open(bucket)?;
            for entry in manifest {
                let key = cache_key(&self.config.resolve(entry)?);
                if cache.match_request(&key)?.is_none() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    // ==================== Activate / cleanup ====================

    /// Delete every bucket that is not one of this version's two buckets.
    ///
    /// Idempotent: a second run right after deletes nothing.
    pub async fn delete_stale_buckets(&self) -> CacheResult<Vec<String>> {
        let mut storage = self.storage.write().await;
        let mut deleted = Vec::new();

        for name in storage.keys()? {
            if self.config.is_current_bucket(&name) {
                continue;
            }
            if storage.delete(&name)? {
                info!(bucket = %name, "Deleting old cache");
                deleted.push(name);
            }
        }

        Ok(deleted)
    }

    // ==================== Fetch ====================

    /// Why a request would not be intercepted, if it would not.
    pub fn bypass_reason(&self, request: &Request) -> Option<BypassReason> {
        if !self.origin.contains(&request.url) {
            return Some(BypassReason::CrossOrigin);
        }
        if request.method != Method::GET {
            return Some(BypassReason::NonGet(request.method.clone()));
        }
        let path = request.url.path();
        self.config
            .excluded_path_markers
            .iter()
            .find(|marker| path.contains(marker.as_str()))
            .map(|marker| BypassReason::ExcludedPath(marker.clone()))
    }

    /// Answer a fetch. Background work is attached to `event`.
    pub async fn handle_fetch(&self, request: Request, event: &mut ExtendableEvent) -> FetchDisposition {
        if let Some(reason) = self.bypass_reason(&request) {
            trace!(url = %request.url, ?reason, "Passing request through");
            return FetchDisposition::Passthrough;
        }

        let key = cache_key(&request.url);
        if let Some(cached) = self.lookup(&key).await {
            debug!(url = %key, "Serving from cache");
            let this = self.clone();
            event.wait_until(async move {
                this.revalidate(request).await;
                Ok(())
            });
            return FetchDisposition::Respond {
                response: cached.to_response(),
                source: ResponseSource::Cache,
            };
        }

        self.fetch_and_cache(request, key, event).await
    }

    async fn fetch_and_cache(
        &self,
        request: Request,
        key: String,
        event: &mut ExtendableEvent,
    ) -> FetchDisposition {
        let is_navigation = request.is_navigation();

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.status == StatusCode::OK && response.response_type == ResponseType::Basic
                {
                    debug!(url = %key, "Fetching and caching");
                    let entry = CachedResponse::from_response(key, &response);
                    let this = self.clone();
                    event.wait_until(async move {
                        this.store(entry).await;
                        Ok(())
                    });
                }
                FetchDisposition::Respond {
                    response,
                    source: ResponseSource::Network,
                }
            }
            Err(err) => {
                debug!(url = %key, error = %err, "Network fetch failed");
                if is_navigation {
                    if let Some(shell) = self.fallback_document().await {
                        return FetchDisposition::Respond {
                            response: shell.to_response(),
                            source: ResponseSource::ShellFallback,
                        };
                    }
                }
                FetchDisposition::Respond {
                    response: Response::offline(),
                    source: ResponseSource::Offline,
                }
            }
        }
    }

    /// Refresh a cached entry. Only a same-origin status 200 overwrites;
    /// everything else, including network failure, is dropped.
    async fn revalidate(&self, request: Request) {
        let key = cache_key(&request.url);
        match self.fetcher.fetch(request).await {
            Ok(response)
                if response.status == StatusCode::OK
                    && response.response_type == ResponseType::Basic =>
            {
                trace!(url = %key, "Revalidated");
                self.store(CachedResponse::from_response(key, &response))
                    .await;
            }
            Ok(response) => {
                trace!(
                    url = %key,
                    status = %response.status,
                    response_type = ?response.response_type,
                    "Revalidation skipped"
                );
            }
            Err(err) => {
                trace!(url = %key, error = %err, "Revalidation failed");
            }
        }
    }

    /// Write into the core bucket; failures are logged and ignored.
    ///
    /// A core bucket that no longer exists belongs to a retired version and
    /// is not recreated.
    async fn store(&self, entry: CachedResponse) {
        let key = entry.key.clone();
        let mut storage = self.storage.write().await;
        let result = match storage.has(&self.core_name) {
            Ok(true) => storage
                .open(&self.core_name)
                .and_then(|mut cache| cache.put(entry)),
            Ok(false) => {
                debug!(url = %key, bucket = %self.core_name, "Bucket retired, dropping write");
                Ok(())
            }
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(url = %key, error = %err, "Cache write failed");
        }
    }

    /// Look up a key: this version's core bucket, then pages, then any other
    /// bucket oldest first. Storage errors count as a miss.
    pub async fn lookup(&self, key: &str) -> Option<CachedResponse> {
        let storage = self.storage.read().await;
        match storage.match_request(key, &[&self.core_name, &self.pages_name]) {
            Ok(hit) => hit,
            Err(err) => {
                warn!(url = %key, error = %err, "Cache lookup failed");
                None
            }
        }
    }

    async fn fallback_document(&self) -> Option<CachedResponse> {
        let url = self.config.resolve(&self.config.fallback_document).ok()?;
        self.lookup(&cache_key(&url)).await
    }
}
