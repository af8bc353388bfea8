//! # Shellcache SW
//!
//! Offline-first cache engine for a marketing site, modelled on the Service
//! Worker lifecycle.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 ServiceWorkerContainer                   │
//! │  registration: installing / waiting / active             │
//! │  events ──► mpsc::UnboundedReceiver<ServiceWorkerEvent>  │
//! └───────────────┬──────────────────────────────────────────┘
//!                 │ WorkerEvent
//!                 ▼
//! ┌──────────────────────────┐    ┌──────────────────────────┐
//! │      ServiceWorker       │───►│  Clients / Notifications │
//! │  message / sync / push   │    └──────────────────────────┘
//! └───────────────┬──────────┘
//!                 ▼
//! ┌──────────────────────────┐    ┌──────────────────────────┐
//! │       CacheManager       │───►│   Fetcher (network)      │
//! │ install / activate /     │    └──────────────────────────┘
//! │ stale-while-revalidate   │
//! └───────────────┬──────────┘
//!                 ▼
//! ┌──────────────────────────┐
//! │ CacheStorage             │
//! │  └─ MemoryBackend        │
//! │  └─ SqliteBackend        │
//! └──────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let loader = Arc::new(ResourceLoader::new(LoaderConfig::default())?);
//! let (container, mut events) = ServiceWorkerContainer::new(CacheStorage::in_memory(), loader);
//!
//! container.register(CacheConfig::default()).await?;
//! let outcome = container.handle_fetch(Request::navigate(url)).await;
//! ```

pub mod clients;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod notifications;
pub mod registration;
pub mod storage;
pub mod worker;

#[cfg(test)]
mod testing;

pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use events::{
    ClientMessage, EventOutcome, ExtendableEvent, MessageEvent, VersionInfo, WorkerEvent,
};
pub use manager::{BypassReason, CacheManager, FetchDisposition, ResponseSource};
pub use notifications::{
    Notification, NotificationAction, NotificationDefaults, NotificationId, Notifications,
    PushPayload,
};
pub use registration::{
    MessageTarget, RegisteredWorker, ServiceWorkerContainer, ServiceWorkerEvent,
    ServiceWorkerRegistration,
};
pub use storage::{
    cache_key, Cache, CacheBackend, CacheStorage, CachedResponse, MemoryBackend, SqliteBackend,
};
pub use worker::{ServiceWorker, ServiceWorkerId, ServiceWorkerState};
