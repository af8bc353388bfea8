//! Events delivered to a worker and the lifetime extension they carry.

use std::future::Future;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shellcache_net::Request;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{CacheError, CacheResult};
use crate::manager::FetchDisposition;
use crate::notifications::NotificationId;

/// Everything the host can deliver to a worker.
#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Message(MessageEvent),
    Sync { tag: String },
    Push(Option<Bytes>),
    NotificationClick {
        notification: NotificationId,
        action: Option<String>,
    },
}

impl WorkerEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::Install => "install",
            WorkerEvent::Activate => "activate",
            WorkerEvent::Fetch(_) => "fetch",
            WorkerEvent::Message(_) => "message",
            WorkerEvent::Sync { .. } => "sync",
            WorkerEvent::Push(_) => "push",
            WorkerEvent::NotificationClick { .. } => "notificationclick",
        }
    }
}

/// A page message with an optional reply port.
#[derive(Debug)]
pub struct MessageEvent {
    pub data: Value,
    pub port: Option<oneshot::Sender<Value>>,
}

impl MessageEvent {
    pub fn new(data: Value) -> Self {
        Self { data, port: None }
    }

    /// Attach a reply port; the receiver gets the worker's answer.
    pub fn with_reply(data: Value) -> (Self, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                data,
                port: Some(tx),
            },
            rx,
        )
    }
}

/// Messages a page may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    SkipWaiting,
    GetVersion,
}

/// Reply to `GET_VERSION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: String,
    pub cache_name: String,
}

/// Work an event keeps alive after its handler returns.
#[derive(Debug, Default)]
pub struct ExtendableEvent {
    pending: Vec<JoinHandle<CacheResult<()>>>,
}

impl ExtendableEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the event's lifetime until `task` completes.
    pub fn wait_until<F>(&mut self, task: F)
    where
        F: Future<Output = CacheResult<()>> + Send + 'static,
    {
        self.pending.push(tokio::spawn(task));
    }

    /// Number of outstanding tasks.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every extension. Returns the first failure, after all have
    /// finished.
    pub async fn settled(self) -> CacheResult<()> {
        let mut first_error = None;
        for handle in self.pending {
            let result = match handle.await {
                Ok(result) => result,
                Err(join) => Err(CacheError::Task(join.to_string())),
            };
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// What dispatching one event produced.
#[derive(Debug)]
pub struct EventOutcome {
    /// Set for fetch events only.
    pub disposition: Option<FetchDisposition>,

    /// Background work the event extended its lifetime with.
    pub lifetime: ExtendableEvent,
}

impl EventOutcome {
    pub(crate) fn done() -> Self {
        Self {
            disposition: None,
            lifetime: ExtendableEvent::new(),
        }
    }

    /// Wait for the event's background work.
    pub async fn settled(self) -> CacheResult<()> {
        self.lifetime.settled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_wire_format() {
        let msg: ClientMessage = serde_json::from_value(json!({ "type": "SKIP_WAITING" })).unwrap();
        assert_eq!(msg, ClientMessage::SkipWaiting);

        let msg: ClientMessage = serde_json::from_value(json!({ "type": "GET_VERSION" })).unwrap();
        assert_eq!(msg, ClientMessage::GetVersion);

        assert!(serde_json::from_value::<ClientMessage>(json!({ "type": "CLEAR" })).is_err());
        assert!(serde_json::from_value::<ClientMessage>(json!("SKIP_WAITING")).is_err());
    }

    #[test]
    fn test_version_info_uses_camel_case() {
        let info = VersionInfo {
            version: "2025-11-02".into(),
            cache_name: "arabsad-v1.0.0".into(),
        };
        assert_eq!(
            serde_json::to_value(info).unwrap(),
            json!({ "version": "2025-11-02", "cacheName": "arabsad-v1.0.0" })
        );
    }

    #[tokio::test]
    async fn test_settled_waits_for_all_and_keeps_first_error() {
        let (tx, rx) = oneshot::channel();
        let mut event = ExtendableEvent::new();
        event.wait_until(async { Err(CacheError::StateError("first".into())) });
        event.wait_until(async move {
            let _ = tx.send(());
            Ok(())
        });
        assert_eq!(event.pending(), 2);

        let err = event.settled().await.unwrap_err();
        assert!(matches!(err, CacheError::StateError(ref m) if m == "first"));
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    #[allow(unreachable_code)]
    async fn test_settled_reports_panics() {
        let mut event = ExtendableEvent::new();
        event.wait_until(async {
            panic!("boom");
            Ok(())
        });
        assert!(matches!(event.settled().await, Err(CacheError::Task(_))));
    }
}
