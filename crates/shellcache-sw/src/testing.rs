//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::StatusCode;
use shellcache_common::Result;
use shellcache_net::{Fetcher, NetError, Request, Response, ResponseType};
use url::Url;

use crate::config::CacheConfig;
use crate::storage::{CacheBackend, CachedResponse, MemoryBackend};

/// Small site: three core files and one page.
pub fn test_config(origin: &str, version: &str) -> CacheConfig {
    CacheConfig {
        app_name: "test".into(),
        ..CacheConfig::for_origin(origin)
            .with_version(version)
            .with_manifests(&["/", "/index.html", "/style.css"], &["/sa.html"])
    }
}

#[derive(Clone)]
struct Route {
    status: u16,
    body: Bytes,
    response_type: ResponseType,
}

/// Fetcher answering from a fixed route table.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Route>>,
    offline: AtomicBool,
    calls: Mutex<Vec<Request>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes for every entry of [`test_config`].
    pub fn site(origin: &str) -> Self {
        let fetcher = Self::new();
        let base = Url::parse(origin).unwrap();
        for (path, body) in [
            ("/", "<html>home</html>"),
            ("/index.html", "<html>shell</html>"),
            ("/style.css", "body{}"),
            ("/sa.html", "<html>sa</html>"),
        ] {
            fetcher.route(&base.join(path).unwrap(), 200, body);
        }
        fetcher
    }

    pub fn route(&self, url: &Url, status: u16, body: &str) {
        self.route_with_type(url, status, body, ResponseType::Basic);
    }

    pub fn route_with_type(&self, url: &Url, status: u16, body: &str, response_type: ResponseType) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Route {
                status,
                body: Bytes::copy_from_slice(body.as_bytes()),
                response_type,
            },
        );
    }

    /// Fail every request with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Requests seen so far, including failed ones.
    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: Request) -> std::result::Result<Response, NetError> {
        self.calls.lock().unwrap().push(request.clone());

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline);
        }

        let route = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
        let route = route.unwrap_or(Route {
            status: 404,
            body: Bytes::new(),
            response_type: ResponseType::Basic,
        });

        let status = StatusCode::from_u16(route.status).unwrap();
        let mut response = Response::new(status, route.body);
        response.url = Some(request.url);
        response.response_type = route.response_type;
        Ok(response)
    }
}

/// Memory backend that counts every call.
pub struct RecordingBackend {
    inner: MemoryBackend,
    ops: Arc<AtomicUsize>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            ops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter, still readable after the backend is boxed.
    pub fn ops(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.ops)
    }

    fn tick(&self) {
        self.ops.fetch_add(1, Ordering::SeqCst);
    }
}

impl CacheBackend for RecordingBackend {
    fn bucket_names(&self) -> Result<Vec<String>> {
        self.tick();
        self.inner.bucket_names()
    }

    fn create_bucket(&mut self, name: &str) -> Result<()> {
        self.tick();
        self.inner.create_bucket(name)
    }

    fn delete_bucket(&mut self, name: &str) -> Result<bool> {
        self.tick();
        self.inner.delete_bucket(name)
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Option<CachedResponse>> {
        self.tick();
        self.inner.get(bucket, key)
    }

    fn put(&mut self, bucket: &str, entry: CachedResponse) -> Result<()> {
        self.tick();
        self.inner.put(bucket, entry)
    }

    fn put_all(&mut self, bucket: &str, entries: Vec<CachedResponse>) -> Result<()> {
        self.tick();
        self.inner.put_all(bucket, entries)
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        self.tick();
        self.inner.keys(bucket)
    }
}
