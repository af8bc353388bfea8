//! One worker version and its event handlers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use shellcache_net::Request;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::clients::Clients;
use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::events::{ClientMessage, EventOutcome, ExtendableEvent, MessageEvent, VersionInfo, WorkerEvent};
use crate::manager::CacheManager;
use crate::notifications::{NotificationId, Notifications, PushPayload};
use crate::registration::ServiceWorkerEvent;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, not yet installing.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install/activation failed.
    Redundant,
}

/// Shared surroundings a worker runs in.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub clients: Arc<RwLock<Clients>>,
    pub notifications: Arc<RwLock<Notifications>>,
    pub events: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

/// A worker version: a cache manager plus the non-fetch handlers.
pub struct ServiceWorker {
    id: ServiceWorkerId,
    manager: CacheManager,
    context: WorkerContext,
    skip_waiting: AtomicBool,
}

impl fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("cache", &self.manager.core_cache_name())
            .field("skip_waiting", &self.skip_waiting_requested())
            .finish()
    }
}

impl ServiceWorker {
    pub(crate) fn new(manager: CacheManager, context: WorkerContext) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            manager,
            context,
            skip_waiting: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }

    pub fn config(&self) -> &CacheConfig {
        self.manager.config()
    }

    /// Ask to be activated without waiting for old clients to close.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Route an event to its handler.
    ///
    /// Only install and activate can fail; every other handler absorbs its
    /// own errors.
    pub async fn dispatch(&self, event: WorkerEvent) -> CacheResult<EventOutcome> {
        debug!(worker = %self.id, event = event.kind(), "Dispatching event");

        match event {
            WorkerEvent::Install => self.on_install().await.map(|_| EventOutcome::done()),
            WorkerEvent::Activate => self.on_activate().await.map(|_| EventOutcome::done()),
            WorkerEvent::Fetch(request) => Ok(self.on_fetch(request).await),
            WorkerEvent::Message(message) => {
                self.on_message(message);
                Ok(EventOutcome::done())
            }
            WorkerEvent::Sync { tag } => Ok(self.on_sync(&tag)),
            WorkerEvent::Push(data) => {
                self.on_push(data).await;
                Ok(EventOutcome::done())
            }
            WorkerEvent::NotificationClick {
                notification,
                action,
            } => {
                self.on_notification_click(notification, action.as_deref())
                    .await;
                Ok(EventOutcome::done())
            }
        }
    }

    async fn on_install(&self) -> CacheResult<()> {
        self.manager.install().await?;
        if self.config().skip_waiting_on_install {
            self.skip_waiting();
        }
        Ok(())
    }

    async fn on_activate(&self) -> CacheResult<()> {
        let deleted = self.manager.delete_stale_buckets().await?;
        if !deleted.is_empty() {
            self.emit(ServiceWorkerEvent::CachesDeleted { names: deleted });
        }

        let claimed = self
            .context
            .clients
            .write()
            .await
            .claim(self.id, self.manager.origin());
        for client_id in claimed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id,
                worker_id: self.id,
            });
        }

        info!(worker = %self.id, cache = %self.manager.core_cache_name(), "Activated");
        Ok(())
    }

    async fn on_fetch(&self, request: Request) -> EventOutcome {
        let mut lifetime = ExtendableEvent::new();
        let disposition = self.manager.handle_fetch(request, &mut lifetime).await;
        EventOutcome {
            disposition: Some(disposition),
            lifetime,
        }
    }

    fn on_message(&self, message: MessageEvent) {
        let parsed = match serde_json::from_value::<ClientMessage>(message.data) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(worker = %self.id, error = %err, "Ignoring unrecognized message");
                return;
            }
        };

        match parsed {
            ClientMessage::SkipWaiting => {
                debug!(worker = %self.id, "Skip waiting requested");
                self.skip_waiting();
            }
            ClientMessage::GetVersion => {
                let Some(port) = message.port else {
                    debug!(worker = %self.id, "GET_VERSION without reply port");
                    return;
                };
                let info = VersionInfo {
                    version: self.config().release.clone(),
                    cache_name: self.manager.core_cache_name().to_string(),
                };
                match serde_json::to_value(info) {
                    Ok(reply) => {
                        let _ = port.send(reply);
                    }
                    Err(err) => warn!(error = %err, "Failed to encode version reply"),
                }
            }
        }
    }

    fn on_sync(&self, tag: &str) -> EventOutcome {
        let mut lifetime = ExtendableEvent::new();
        if tag == self.config().cleanup_sync_tag {
            let manager = self.manager.clone();
            let events = self.context.events.clone();
            lifetime.wait_until(async move {
                let deleted = manager.delete_stale_buckets().await?;
                if !deleted.is_empty() {
                    let _ = events.send(ServiceWorkerEvent::CachesDeleted { names: deleted });
                }
                Ok(())
            });
        } else {
            debug!(worker = %self.id, tag, "Ignoring sync tag");
        }
        EventOutcome {
            disposition: None,
            lifetime,
        }
    }

    async fn on_push(&self, data: Option<Bytes>) -> Option<NotificationId> {
        let Some(bytes) = data else {
            debug!(worker = %self.id, "Push without payload");
            return None;
        };
        let payload = match serde_json::from_slice::<PushPayload>(&bytes) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(worker = %self.id, error = %err, "Dropping malformed push payload");
                return None;
            }
        };

        let notification = self.config().notification.build(payload);
        let title = notification.title.clone();
        let id = self.context.notifications.write().await.show(notification);
        self.emit(ServiceWorkerEvent::NotificationShown {
            notification: id,
            title,
        });
        Some(id)
    }

    async fn on_notification_click(&self, notification: NotificationId, action: Option<&str>) {
        self.context
            .notifications
            .write()
            .await
            .close(notification);

        if !matches!(action, None | Some("open")) {
            return;
        }

        let start = self
            .config()
            .resolve(&self.config().start_url)
            .map(|url| url.to_string());
        let mut clients = self.context.clients.write().await;
        let opened = match start {
            Ok(url) => clients.open_window(&url),
            Err(err) => Err(err),
        }
        .or_else(|err| {
            debug!(error = %err, "Start URL unusable, opening site URL");
            clients.open_window(&self.config().notification.site_url)
        });

        match opened {
            Ok(client) => self.emit(ServiceWorkerEvent::WindowOpened {
                client_id: client.id,
                url: client.url.to_string(),
            }),
            Err(err) => warn!(error = %err, "Failed to open window"),
        }
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.context.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{Client, ClientMatchOptions};
    use crate::manager::ResponseSource;
    use crate::storage::CacheStorage;
    use crate::testing::{test_config, MockFetcher};
    use serde_json::json;
    use url::Url;

    const ORIGIN: &str = "https://arabsad.test";

    struct Harness {
        worker: ServiceWorker,
        fetcher: Arc<MockFetcher>,
        storage: Arc<RwLock<CacheStorage>>,
        clients: Arc<RwLock<Clients>>,
        notifications: Arc<RwLock<Notifications>>,
        events: mpsc::UnboundedReceiver<ServiceWorkerEvent>,
    }

    fn harness(config: CacheConfig) -> Harness {
        let fetcher = Arc::new(MockFetcher::site(ORIGIN));
        let storage = Arc::new(RwLock::new(CacheStorage::in_memory()));
        let manager =
            CacheManager::new(Arc::new(config), Arc::clone(&storage), fetcher.clone()).unwrap();
        let (tx, events) = mpsc::unbounded_channel();
        let context = WorkerContext {
            clients: Arc::new(RwLock::new(Clients::new())),
            notifications: Arc::new(RwLock::new(Notifications::new())),
            events: tx,
        };
        Harness {
            worker: ServiceWorker::new(manager, context.clone()),
            fetcher,
            storage,
            clients: context.clients,
            notifications: context.notifications,
            events,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServiceWorkerEvent>) -> Vec<ServiceWorkerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_install_requests_skip_waiting() {
        let h = harness(test_config(ORIGIN, "1"));
        assert!(!h.worker.skip_waiting_requested());

        h.worker.dispatch(WorkerEvent::Install).await.unwrap();
        assert!(h.worker.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_install_without_skip_waiting() {
        let config = CacheConfig {
            skip_waiting_on_install: false,
            ..test_config(ORIGIN, "1")
        };
        let h = harness(config);

        h.worker.dispatch(WorkerEvent::Install).await.unwrap();
        assert!(!h.worker.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_failed_install_propagates() {
        let h = harness(test_config(ORIGIN, "1"));
        h.fetcher.set_offline(true);

        assert!(h.worker.dispatch(WorkerEvent::Install).await.is_err());
        assert!(!h.worker.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_activate_deletes_old_and_claims_clients() {
        let mut h = harness(test_config(ORIGIN, "2"));
        h.storage.write().await.open("test-v1").unwrap();
        h.clients
            .write()
            .await
            .add(Client::window(Url::parse("https://arabsad.test/").unwrap()));

        h.worker.dispatch(WorkerEvent::Install).await.unwrap();
        h.worker.dispatch(WorkerEvent::Activate).await.unwrap();

        assert_eq!(
            h.storage.read().await.keys().unwrap(),
            vec!["test-v2", "test-v2-pages"]
        );
        let controlled = h.clients.read().await.match_all(ClientMatchOptions::default()).len();
        assert_eq!(controlled, 1);

        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(
            e,
            ServiceWorkerEvent::CachesDeleted { names } if names == &vec!["test-v1".to_string()]
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, ServiceWorkerEvent::ControllerChange { .. })));
    }

    #[tokio::test]
    async fn test_fetch_event_carries_disposition() {
        let h = harness(test_config(ORIGIN, "1"));
        h.worker.dispatch(WorkerEvent::Install).await.unwrap();

        let url = Url::parse("https://arabsad.test/style.css").unwrap();
        let outcome = h
            .worker
            .dispatch(WorkerEvent::Fetch(Request::get(url)))
            .await
            .unwrap();

        assert_eq!(
            outcome.disposition.as_ref().and_then(|d| d.source()),
            Some(ResponseSource::Cache)
        );
        assert_eq!(outcome.lifetime.pending(), 1);
        outcome.settled().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_version_replies_on_port() {
        let h = harness(test_config(ORIGIN, "1"));
        let (message, reply) = MessageEvent::with_reply(json!({ "type": "GET_VERSION" }));

        h.worker.dispatch(WorkerEvent::Message(message)).await.unwrap();

        assert_eq!(
            reply.await.unwrap(),
            json!({ "version": "2025-11-02", "cacheName": "test-v1" })
        );
    }

    #[tokio::test]
    async fn test_unknown_messages_are_ignored() {
        let h = harness(CacheConfig {
            skip_waiting_on_install: false,
            ..test_config(ORIGIN, "1")
        });

        for data in [json!({ "type": "CLEAR_ALL" }), json!(42), json!({ "kind": "SKIP_WAITING" })] {
            h.worker
                .dispatch(WorkerEvent::Message(MessageEvent::new(data)))
                .await
                .unwrap();
        }
        h.worker
            .dispatch(WorkerEvent::Message(MessageEvent::new(json!({ "type": "GET_VERSION" }))))
            .await
            .unwrap();

        assert!(!h.worker.skip_waiting_requested());

        h.worker
            .dispatch(WorkerEvent::Message(MessageEvent::new(json!({ "type": "SKIP_WAITING" }))))
            .await
            .unwrap();
        assert!(h.worker.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_cleanup_sync_tag() {
        let h = harness(test_config(ORIGIN, "2"));
        h.storage.write().await.open("test-v1").unwrap();
        h.storage.write().await.open("test-v2").unwrap();

        let outcome = h
            .worker
            .dispatch(WorkerEvent::Sync {
                tag: "other".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.lifetime.pending(), 0);

        let outcome = h
            .worker
            .dispatch(WorkerEvent::Sync {
                tag: "cache-cleanup".into(),
            })
            .await
            .unwrap();
        outcome.settled().await.unwrap();

        assert_eq!(h.storage.read().await.keys().unwrap(), vec!["test-v2"]);
    }

    fn empty_payload() -> Option<Bytes> {
        Some(Bytes::from_static(b"{}"))
    }

    #[tokio::test]
    async fn test_push_with_and_without_payload() {
        let mut h = harness(test_config(ORIGIN, "1"));

        h.worker.dispatch(WorkerEvent::Push(None)).await.unwrap();
        assert!(h.notifications.read().await.is_empty());

        h.worker.dispatch(WorkerEvent::Push(empty_payload())).await.unwrap();
        h.worker
            .dispatch(WorkerEvent::Push(Some(Bytes::from_static(
                br#"{"title":"Offer","body":"50% off"}"#,
            ))))
            .await
            .unwrap();
        h.worker
            .dispatch(WorkerEvent::Push(Some(Bytes::from_static(b"not json"))))
            .await
            .unwrap();

        // Same tag: the second replaced the first, the malformed one showed nothing.
        assert_eq!(h.notifications.read().await.len(), 1);

        let titles: Vec<String> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                ServiceWorkerEvent::NotificationShown { title, .. } => Some(title),
                _ => None,
            })
            .collect();
        assert_eq!(titles, vec!["مؤسسة إعلانات العرب".to_string(), "Offer".to_string()]);
    }

    #[tokio::test]
    async fn test_notification_click_actions() {
        let mut h = harness(test_config(ORIGIN, "1"));

        let id = h.worker.on_push(empty_payload()).await.unwrap();
        h.worker
            .dispatch(WorkerEvent::NotificationClick {
                notification: id,
                action: Some("close".into()),
            })
            .await
            .unwrap();
        assert!(h.notifications.read().await.is_empty());
        assert!(h.clients.read().await.is_empty());

        let id = h.worker.on_push(empty_payload()).await.unwrap();
        h.worker
            .dispatch(WorkerEvent::NotificationClick {
                notification: id,
                action: None,
            })
            .await
            .unwrap();

        let opened: Vec<String> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                ServiceWorkerEvent::WindowOpened { url, .. } => Some(url),
                _ => None,
            })
            .collect();
        assert_eq!(opened, vec!["https://arabsad.test/".to_string()]);
    }

    #[tokio::test]
    async fn test_notification_click_falls_back_to_site_url() {
        let mut config = test_config(ORIGIN, "1");
        config.start_url = "http://[bad".into();
        config.notification.site_url = "https://arabsad.com".into();
        let mut h = harness(config);

        let id = h.worker.on_push(empty_payload()).await.unwrap();
        h.worker
            .on_notification_click(id, Some("open"))
            .await;

        let opened = drain(&mut h.events).into_iter().find_map(|e| match e {
            ServiceWorkerEvent::WindowOpened { url, .. } => Some(url),
            _ => None,
        });
        assert_eq!(opened.as_deref(), Some("https://arabsad.com/"));
    }
}
