//! Cache engine configuration.
//!
//! Fixed at deployment and read-only at runtime. A new version string is the
//! only migration mechanism: it renames both buckets and the next activation
//! deletes everything else.

use serde::{Deserialize, Serialize};
use shellcache_net::Origin;
use url::Url;

use crate::error::{CacheError, CacheResult};
use crate::notifications::NotificationDefaults;

/// Configuration for one worker version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Bucket name prefix.
    pub app_name: String,

    /// Semver of the cached shell; part of both bucket names.
    pub version: String,

    /// Release identifier reported by `GET_VERSION`.
    pub release: String,

    /// Site origin, e.g. `https://arabsad.com`.
    pub origin: String,

    /// Shell files stored in the core bucket at install.
    pub core_manifest: Vec<String>,

    /// Secondary HTML documents stored in the pages bucket at install.
    pub pages_manifest: Vec<String>,

    /// Path substrings that bypass the cache entirely.
    pub excluded_path_markers: Vec<String>,

    /// Cached document served to failed navigations.
    pub fallback_document: String,

    /// Background sync tag that re-runs stale bucket deletion.
    pub cleanup_sync_tag: String,

    /// Request skip-waiting as soon as install succeeds.
    pub skip_waiting_on_install: bool,

    /// Window opened by a notification click.
    pub start_url: String,

    /// Push notification defaults.
    pub notification: NotificationDefaults,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            app_name: "arabsad".to_string(),
            version: "1.0.0".to_string(),
            release: "2025-11-02".to_string(),
            origin: "https://arabsad.com".to_string(),
            core_manifest: [
                "/",
                "/index.html",
                "/assets/css/main.css",
                "/assets/css/slider.css",
                "/assets/css/ux-enhancements.css",
                "/enhanced-arabic-fonts.css",
                "/script.js",
                "/assets/js/boot.js",
                "/assets/images/logo.svg",
                "/favicon.ico",
                "/favicon.svg",
                "/manifest.json",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            pages_manifest: [
                "/services-page.html",
                "/google-ads-service.html",
                "/social-media-service.html",
                "/seo-service.html",
                "/ecommerce-service.html",
                "/sa.html",
                "/ae.html",
                "/kw.html",
                "/qa.html",
                "/bh.html",
                "/om.html",
                "/privacy-policy.html",
                "/terms-of-service.html",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            excluded_path_markers: vec!["wp-admin".into(), "api".into(), ".php".into()],
            fallback_document: "/index.html".to_string(),
            cleanup_sync_tag: "cache-cleanup".to_string(),
            skip_waiting_on_install: true,
            start_url: "/".to_string(),
            notification: NotificationDefaults::default(),
        }
    }
}

impl CacheConfig {
    /// Config for a different site, keeping the default lists.
    pub fn for_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Default::default()
        }
    }

    /// Replace the version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replace both manifests.
    pub fn with_manifests(mut self, core: &[&str], pages: &[&str]) -> Self {
        self.core_manifest = core.iter().map(|s| s.to_string()).collect();
        self.pages_manifest = pages.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Name of the core bucket: `<app>-v<version>`.
    pub fn core_cache_name(&self) -> String {
        format!("{}-v{}", self.app_name, self.version)
    }

    /// Name of the pages bucket: `<app>-v<version>-pages`.
    pub fn pages_cache_name(&self) -> String {
        format!("{}-pages", self.core_cache_name())
    }

    /// Whether a bucket belongs to this version.
    pub fn is_current_bucket(&self, name: &str) -> bool {
        name == self.core_cache_name() || name == self.pages_cache_name()
    }

    /// Parsed site URL.
    pub fn origin_url(&self) -> CacheResult<Url> {
        Url::parse(&self.origin)
            .map_err(|e| CacheError::Config(format!("invalid origin {:?}: {}", self.origin, e)))
    }

    /// Site origin.
    pub fn site_origin(&self) -> CacheResult<Origin> {
        let origin = Origin::from_url(&self.origin_url()?);
        if origin.is_opaque() {
            return Err(CacheError::Config(format!(
                "origin {:?} is opaque",
                self.origin
            )));
        }
        Ok(origin)
    }

    /// Resolve a site-relative path (or absolute URL) against the origin.
    pub fn resolve(&self, entry: &str) -> CacheResult<Url> {
        self.origin_url()?
            .join(entry)
            .map_err(|e| CacheError::InvalidManifestEntry {
                entry: entry.to_string(),
                reason: e.to_string(),
            })
    }

    /// Check the config before a worker is built from it.
    pub fn validate(&self) -> CacheResult<()> {
        if self.app_name.trim().is_empty() {
            return Err(CacheError::Config("app_name must not be empty".into()));
        }
        if self.version.trim().is_empty() {
            return Err(CacheError::Config("version must not be empty".into()));
        }

        let origin = self.site_origin()?;
        let entries = self
            .core_manifest
            .iter()
            .chain(self.pages_manifest.iter())
            .chain(std::iter::once(&self.fallback_document));
        for entry in entries {
            let url = self.resolve(entry)?;
            if !origin.contains(&url) {
                return Err(CacheError::InvalidManifestEntry {
                    entry: entry.clone(),
                    reason: format!("not on {}", origin),
                });
            }
        }
        Ok(())
    }
}
