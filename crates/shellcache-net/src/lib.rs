//! # shellcache net
//!
//! Request/response model and HTTP loading for the shellcache engine.
//!
//! ## Design Goals
//!
//! 1. **Async HTTP**: Non-blocking network requests through [`Fetcher`]
//! 2. **Cloneable responses**: Bodies are fully buffered so a response can be
//!    returned to the page and stored in a cache at the same time
//! 3. **Response typing**: `basic` vs `cors` is derived from the requesting
//!    client's origin, the way a browser tags fetch results

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

pub mod origin;

pub use origin::Origin;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Offline")]
    Offline,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Credentials mode for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsMode {
    /// Never send cookies or authorization.
    Omit,
    /// Send credentials only for same-origin requests.
    #[default]
    SameOrigin,
    /// Always send credentials.
    Include,
}

/// What the requested resource will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestDestination {
    /// Top-level document navigation.
    Document,
    Style,
    Script,
    Image,
    Font,
    Manifest,
    /// fetch()/XHR and anything unclassified.
    #[default]
    Empty,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub credentials: CredentialsMode,
    pub destination: RequestDestination,
    /// Origin of the page that issued the request, if known.
    pub client_origin: Option<Origin>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a document navigation request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).destination(RequestDestination::Document)
    }

    /// Create a request with an arbitrary method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            credentials: CredentialsMode::SameOrigin,
            destination: RequestDestination::Empty,
            client_origin: None,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the body.
    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Set the credentials mode.
    pub fn credentials(mut self, credentials: CredentialsMode) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the issuing client's origin.
    pub fn client_origin(mut self, origin: Origin) -> Self {
        self.client_origin = Some(origin);
        self
    }

    /// Whether this is a full document navigation.
    pub fn is_navigation(&self) -> bool {
        self.destination == RequestDestination::Document
    }
}

/// How a response may be observed by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Same-origin, fully readable.
    #[default]
    Basic,
    /// Cross-origin via CORS.
    Cors,
    /// Cross-origin no-cors; status and body hidden.
    Opaque,
    /// Synthesized by the worker.
    Default,
}

/// HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Option<Url>,
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    body: Bytes,
}

impl Response {
    /// Create a synthetic response.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
            response_type: ResponseType::Default,
            body: body.into(),
        }
    }

    /// Empty `408 Offline` response served when nothing better exists.
    pub fn offline() -> Self {
        Self {
            status_text: "Offline".to_string(),
            ..Self::new(StatusCode::REQUEST_TIMEOUT, Bytes::new())
        }
    }

    /// Rebuild a response from stored parts.
    pub fn from_parts(
        url: Option<Url>,
        status: StatusCode,
        status_text: String,
        headers: HeaderMap,
        response_type: ResponseType,
        body: Bytes,
    ) -> Self {
        Self {
            url,
            status,
            status_text,
            headers,
            response_type,
            body,
        }
    }

    /// Set a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Borrow the body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Content-Type header value, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Anything that can perform a network fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Transport timeout; `None` leaves it to the platform.
    pub timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("shellcache/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "ar,en;q=0.8".to_string(),
            timeout: None,
            max_redirects: 10,
        }
    }
}

/// Resource loader for fetching URLs over HTTP.
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!("ResourceLoader initialized");

        Ok(Self { client, config })
    }

    fn response_type(request: &Request, final_url: &Url) -> ResponseType {
        let client_origin = request
            .client_origin
            .clone()
            .unwrap_or_else(|| Origin::from_url(&request.url));
        if client_origin.contains(final_url) {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Fetcher for ResourceLoader {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            if request.credentials == CredentialsMode::Omit
                && (name == header::COOKIE || name == header::AUTHORIZATION)
            {
                continue;
            }
            req_builder = req_builder.header(name, value);
        }

        req_builder = req_builder.header(header::ACCEPT_LANGUAGE, &self.config.accept_language);

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        let response = req_builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let response_type = Self::response_type(&request, &url);
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            response_type = ?response_type,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url: Some(url),
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            response_type,
            body,
        })
    }
}
