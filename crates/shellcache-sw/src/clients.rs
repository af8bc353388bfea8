//! Clients API: the pages a worker can control.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use shellcache_net::Origin;
use url::Url;

use crate::error::{CacheError, CacheResult};
use crate::worker::ServiceWorkerId;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// A client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Worker currently controlling this client.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// A window client that no worker controls yet.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }
}

/// Options for `clients.matchAll()`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients registry shared by every worker version of a site.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Match all clients.
    pub fn match_all(&self, options: ClientMatchOptions) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller.is_some())
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect()
    }

    /// Open a focused window.
    pub fn open_window(&mut self, url: &str) -> CacheResult<Client> {
        let url = Url::parse(url).map_err(|e| CacheError::StateError(e.to_string()))?;

        let mut client = Client::window(url);
        client.focused = true;
        for other in self.clients.values_mut() {
            other.focused = false;
        }

        self.clients.insert(client.id.clone(), client.clone());
        Ok(client)
    }

    /// Take control of every client on `origin` not already controlled by
    /// `worker`. Returns the IDs of the clients whose controller changed.
    pub fn claim(&mut self, worker: ServiceWorkerId, origin: &Origin) -> Vec<String> {
        let mut claimed = Vec::new();
        for client in self.clients.values_mut() {
            if origin.contains(&client.url) && client.controller != Some(worker) {
                client.controller = Some(worker);
                claimed.push(client.id.clone());
            }
        }
        claimed
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Number of known clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
