//! Registration lifecycle: installing → waiting → active.
//!
//! The container owns the shared cache storage, clients and notifications
//! for one site and hands every host event to the right worker version.
//! State changes are published on an unbounded channel.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde_json::Value;
use shellcache_net::{Fetcher, Request};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::clients::Clients;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::events::{EventOutcome, MessageEvent, WorkerEvent};
use crate::manager::{CacheManager, FetchDisposition};
use crate::notifications::{NotificationId, Notifications};
use crate::storage::CacheStorage;
use crate::worker::{ServiceWorker, ServiceWorkerId, ServiceWorkerState, WorkerContext};

/// A worker held in one of the registration slots.
#[derive(Debug, Clone)]
pub struct RegisteredWorker {
    pub worker: Arc<ServiceWorker>,
    pub state: ServiceWorkerState,
    pub state_changed_at: Instant,
}

impl RegisteredWorker {
    fn new(worker: Arc<ServiceWorker>, state: ServiceWorkerState) -> Self {
        Self {
            worker,
            state,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }
}

/// Service worker registration.
#[derive(Debug, Default)]
pub struct ServiceWorkerRegistration {
    /// Installing worker.
    pub installing: Option<RegisteredWorker>,

    /// Waiting worker.
    pub waiting: Option<RegisteredWorker>,

    /// Active worker.
    pub active: Option<RegisteredWorker>,
}

/// Service worker events.
#[derive(Debug, Clone)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A new version started installing.
    UpdateFound { cache_name: String },
    /// Controller changed.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    /// Stale buckets were deleted.
    CachesDeleted { names: Vec<String> },
    /// A push produced a notification.
    NotificationShown {
        notification: NotificationId,
        title: String,
    },
    /// A notification click opened a window.
    WindowOpened { client_id: String, url: String },
}

/// Which worker a page message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    Active,
    Waiting,
}

/// Service worker container (`navigator.serviceWorker`) for one site.
pub struct ServiceWorkerContainer {
    registration: Arc<RwLock<ServiceWorkerRegistration>>,

    /// Cache storage.
    caches: Arc<RwLock<CacheStorage>>,

    fetcher: Arc<dyn Fetcher>,

    context: WorkerContext,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registration: Arc::new(RwLock::new(ServiceWorkerRegistration::default())),
                caches: Arc::new(RwLock::new(storage)),
                fetcher,
                context: WorkerContext {
                    clients: Arc::new(RwLock::new(Clients::new())),
                    notifications: Arc::new(RwLock::new(Notifications::new())),
                    events: event_tx,
                },
            },
            event_rx,
        )
    }

    pub fn caches(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.caches)
    }

    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.context.clients)
    }

    pub fn notifications(&self) -> Arc<RwLock<Notifications>> {
        Arc::clone(&self.context.notifications)
    }

    fn build_worker(&self, config: CacheConfig) -> CacheResult<Arc<ServiceWorker>> {
        let manager = CacheManager::new(
            Arc::new(config),
            Arc::clone(&self.caches),
            Arc::clone(&self.fetcher),
        )?;
        Ok(Arc::new(ServiceWorker::new(manager, self.context.clone())))
    }

    fn transition(&self, slot: &mut RegisteredWorker, state: ServiceWorkerState) {
        slot.set_state(state);
        debug!(worker = %slot.worker.id(), ?state, "Worker state changed");
        let _ = self.context.events.send(ServiceWorkerEvent::StateChange {
            worker_id: slot.worker.id(),
            new_state: state,
        });
    }

    /// Install a new version.
    ///
    /// The current active worker keeps serving while the new one installs.
    /// On success the new worker waits, and is activated at once when there
    /// is no active worker or it asked to skip waiting.
    pub async fn register(&self, config: CacheConfig) -> CacheResult<ServiceWorkerId> {
        let worker = self.build_worker(config)?;
        let id = worker.id();

        {
            let mut registration = self.registration.write().await;
            if let Some(mut previous) = registration.installing.take() {
                self.transition(&mut previous, ServiceWorkerState::Redundant);
            }
            let mut slot = RegisteredWorker::new(Arc::clone(&worker), ServiceWorkerState::Parsed);
            self.transition(&mut slot, ServiceWorkerState::Installing);
            registration.installing = Some(slot);
        }
        let _ = self.context.events.send(ServiceWorkerEvent::UpdateFound {
            cache_name: worker.manager().core_cache_name().to_string(),
        });

        let installed = match worker.dispatch(WorkerEvent::Install).await {
            Ok(outcome) => outcome.settled().await,
            Err(err) => Err(err),
        };

        let activate_now = {
            let mut registration = self.registration.write().await;
            let Some(mut slot) = registration
                .installing
                .take_if(|slot| slot.worker.id() == id)
            else {
                return Err(CacheError::StateError(format!(
                    "{} was replaced while installing",
                    id
                )));
            };

            if let Err(err) = installed {
                warn!(worker = %id, error = %err, "Install failed");
                self.transition(&mut slot, ServiceWorkerState::Redundant);
                return Err(err);
            }

            self.transition(&mut slot, ServiceWorkerState::Installed);
            if let Some(mut previous) = registration.waiting.replace(slot) {
                self.transition(&mut previous, ServiceWorkerState::Redundant);
            }
            registration.active.is_none() || worker.skip_waiting_requested()
        };

        if activate_now {
            self.activate_waiting().await?;
        }
        Ok(id)
    }

    /// Adopt an already-installed version as the active worker without
    /// fetching anything, e.g. after a restart over persistent storage.
    ///
    /// Both buckets must hold their complete manifests.
    pub async fn resume(&self, config: CacheConfig) -> CacheResult<ServiceWorkerId> {
        let worker = self.build_worker(config)?;
        let core = worker.manager().core_cache_name().to_string();
        if !worker.manager().is_installed().await? {
            return Err(CacheError::StateError(format!(
                "cache {} is not installed",
                core
            )));
        }

        let mut registration = self.registration.write().await;
        let mut slot = RegisteredWorker::new(Arc::clone(&worker), ServiceWorkerState::Installed);
        self.transition(&mut slot, ServiceWorkerState::Activated);
        if let Some(mut previous) = registration.active.replace(slot) {
            self.transition(&mut previous, ServiceWorkerState::Redundant);
        }
        info!(worker = %worker.id(), cache = %core, "Resumed installed version");
        Ok(worker.id())
    }

    /// Promote the waiting worker. Returns false when nothing is waiting.
    ///
    /// Fetches queue behind activation; the previous active worker is only
    /// retired once the new one has activated.
    pub async fn activate_waiting(&self) -> CacheResult<bool> {
        let mut registration = self.registration.write().await;
        let Some(mut slot) = registration.waiting.take() else {
            return Ok(false);
        };

        self.transition(&mut slot, ServiceWorkerState::Activating);
        let activated = match slot.worker.dispatch(WorkerEvent::Activate).await {
            Ok(outcome) => outcome.settled().await,
            Err(err) => Err(err),
        };

        if let Err(err) = activated {
            warn!(worker = %slot.worker.id(), error = %err, "Activation failed");
            self.transition(&mut slot, ServiceWorkerState::Redundant);
            return Err(err);
        }

        self.transition(&mut slot, ServiceWorkerState::Activated);
        if let Some(mut previous) = registration.active.replace(slot) {
            self.transition(&mut previous, ServiceWorkerState::Redundant);
        }
        Ok(true)
    }

    /// State of the active worker, if any.
    pub async fn active_state(&self) -> Option<ServiceWorkerState> {
        self.registration.read().await.active.as_ref().map(|s| s.state)
    }

    /// State of the waiting worker, if any.
    pub async fn waiting_state(&self) -> Option<ServiceWorkerState> {
        self.registration.read().await.waiting.as_ref().map(|s| s.state)
    }

    /// The active worker.
    pub async fn active_worker(&self) -> Option<Arc<ServiceWorker>> {
        self.worker(MessageTarget::Active).await
    }

    async fn worker(&self, target: MessageTarget) -> Option<Arc<ServiceWorker>> {
        let registration = self.registration.read().await;
        let slot = match target {
            MessageTarget::Active => registration.active.as_ref(),
            MessageTarget::Waiting => registration.waiting.as_ref(),
        };
        slot.map(|slot| Arc::clone(&slot.worker))
    }

    /// Handle fetch event. Without an active worker the request passes
    /// through.
    pub async fn handle_fetch(&self, request: Request) -> EventOutcome {
        let Some(worker) = self.active_worker().await else {
            return EventOutcome {
                disposition: Some(FetchDisposition::Passthrough),
                ..EventOutcome::done()
            };
        };
        match worker.dispatch(WorkerEvent::Fetch(request)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "Fetch handler failed, passing through");
                EventOutcome {
                    disposition: Some(FetchDisposition::Passthrough),
                    ..EventOutcome::done()
                }
            }
        }
    }

    /// Post a page message. A waiting worker that asks to skip waiting is
    /// activated before this returns.
    pub async fn post_message(
        &self,
        target: MessageTarget,
        data: Value,
        port: Option<oneshot::Sender<Value>>,
    ) -> CacheResult<()> {
        let worker = self
            .worker(target)
            .await
            .ok_or_else(|| CacheError::StateError(format!("no {:?} worker", target)))?;

        worker
            .dispatch(WorkerEvent::Message(MessageEvent { data, port }))
            .await?;

        if target == MessageTarget::Waiting && worker.skip_waiting_requested() {
            self.activate_waiting().await?;
        }
        Ok(())
    }

    /// Deliver a background sync event to the active worker.
    pub async fn sync(&self, tag: &str) -> CacheResult<()> {
        let Some(worker) = self.active_worker().await else {
            debug!(tag, "No active worker for sync");
            return Ok(());
        };
        worker
            .dispatch(WorkerEvent::Sync { tag: tag.to_string() })
            .await?
            .settled()
            .await
    }

    /// Deliver a push message to the active worker.
    pub async fn push(&self, data: Option<Bytes>) -> CacheResult<()> {
        let Some(worker) = self.active_worker().await else {
            debug!("No active worker for push");
            return Ok(());
        };
        worker.dispatch(WorkerEvent::Push(data)).await.map(|_| ())
    }

    /// Deliver a notification click to the active worker.
    pub async fn notification_click(
        &self,
        notification: NotificationId,
        action: Option<String>,
    ) -> CacheResult<()> {
        let Some(worker) = self.active_worker().await else {
            return Ok(());
        };
        worker
            .dispatch(WorkerEvent::NotificationClick {
                notification,
                action,
            })
            .await
            .map(|_| ())
    }
}
