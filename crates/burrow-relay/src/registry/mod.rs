//! In-memory registry of live tunnel clients.
//!
//! A client record is created by a validly signed registration frame,
//! refreshed by every signed frame on its connection, and destroyed when
//! the connection ends or when it has been silent past the inactivity
//! threshold.

pub mod connection;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

pub use connection::{ConnectionId, TunnelConnection};

/// Sweep cadence for the liveness task.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A client silent for longer than this is evicted.
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(300);

struct ClientEntry {
    conn: Arc<TunnelConnection>,
    /// Refreshed on every validly signed inbound frame. `Instant` is
    /// monotonic, so the value never moves backwards.
    last_seen: Instant,
}

/// Thread-safe map from client id to its tunnel connection.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<Uuid, ClientEntry>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `client_id`. Re-registration
    /// under the same id replaces the prior record.
    pub async fn register(&self, client_id: Uuid, conn: Arc<TunnelConnection>) {
        let conn_id = conn.id();
        let replaced = self
            .clients
            .write()
            .await
            .insert(
                client_id,
                ClientEntry {
                    conn,
                    last_seen: Instant::now(),
                },
            )
            .is_some();
        info!(client_id = %client_id, conn_id, replaced, "Tunnel client registered");
    }

    /// Refresh `last_seen` for every client bound to `conn_id`.
    pub async fn touch_connection(&self, conn_id: ConnectionId) {
        let now = Instant::now();
        for entry in self.clients.write().await.values_mut() {
            if entry.conn.id() == conn_id {
                entry.last_seen = now;
            }
        }
    }

    /// Whether any registered client is bound to `conn_id`.
    pub async fn is_registered_connection(&self, conn_id: ConnectionId) -> bool {
        self.clients
            .read()
            .await
            .values()
            .any(|entry| entry.conn.id() == conn_id)
    }

    /// Pick a client to carry the next request: the first entry in
    /// iteration order. No load balancing is attempted.
    pub async fn select(&self) -> Option<(Uuid, Arc<TunnelConnection>)> {
        self.clients
            .read()
            .await
            .iter()
            .next()
            .map(|(id, entry)| (*id, Arc::clone(&entry.conn)))
    }

    /// Remove every client bound to a closed connection. Returns the
    /// removed ids.
    pub async fn remove_connection(&self, conn_id: ConnectionId) -> Vec<Uuid> {
        let mut clients = self.clients.write().await;
        let removed: Vec<Uuid> = clients
            .iter()
            .filter(|(_, entry)| entry.conn.id() == conn_id)
            .map(|(id, _)| *id)
            .collect();
        for id in &removed {
            clients.remove(id);
            info!(client_id = %id, conn_id, "Tunnel client removed with its connection");
        }
        removed
    }

    /// Remove every client silent for longer than `max_idle`. Returns
    /// the evicted ids.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<Uuid> {
        let now = Instant::now();
        let mut clients = self.clients.write().await;
        let stale: Vec<Uuid> = clients
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) > max_idle)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            clients.remove(id);
            warn!(client_id = %id, "Evicted inactive tunnel client");
        }
        stale
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Spawn the periodic liveness sweep (every [`SWEEP_INTERVAL`], evicting
/// clients idle past [`IDLE_THRESHOLD`]).
pub fn spawn_eviction_task(
    registry: ClientRegistry,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(SWEEP_INTERVAL);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let evicted = registry.evict_idle(IDLE_THRESHOLD).await;
                    if !evicted.is_empty() {
                        info!(count = evicted.len(), "Liveness sweep evicted clients");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Eviction task shutting down");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_conn(id: ConnectionId) -> Arc<TunnelConnection> {
        let (tx, _rx) = mpsc::channel(16);
        TunnelConnection::new(id, tx)
    }

    #[tokio::test]
    async fn register_and_select() {
        let registry = ClientRegistry::new();
        assert!(registry.select().await.is_none());

        let client_id = Uuid::new_v4();
        registry.register(client_id, test_conn(1)).await;

        let (selected, conn) = registry.select().await.unwrap();
        assert_eq!(selected, client_id);
        assert_eq!(conn.id(), 1);
        assert_eq!(registry.client_count().await, 1);
    }

    #[tokio::test]
    async fn reregistration_replaces_record() {
        let registry = ClientRegistry::new();
        let client_id = Uuid::new_v4();

        registry.register(client_id, test_conn(1)).await;
        registry.register(client_id, test_conn(2)).await;

        assert_eq!(registry.client_count().await, 1);
        let (_, conn) = registry.select().await.unwrap();
        assert_eq!(conn.id(), 2);
    }

    #[tokio::test]
    async fn remove_connection_drops_only_its_clients() {
        let registry = ClientRegistry::new();
        let on_conn_1 = Uuid::new_v4();
        let on_conn_2 = Uuid::new_v4();

        registry.register(on_conn_1, test_conn(1)).await;
        registry.register(on_conn_2, test_conn(2)).await;

        let removed = registry.remove_connection(1).await;
        assert_eq!(removed, vec![on_conn_1]);
        assert_eq!(registry.client_count().await, 1);
        assert!(!registry.is_registered_connection(1).await);
        assert!(registry.is_registered_connection(2).await);
    }

    #[tokio::test]
    async fn eviction_removes_only_idle_clients() {
        let registry = ClientRegistry::new();
        let idle = Uuid::new_v4();
        let fresh = Uuid::new_v4();

        registry.register(idle, test_conn(1)).await;
        registry.register(fresh, test_conn(2)).await;

        // Nothing is older than a generous threshold.
        assert!(registry.evict_idle(Duration::from_secs(60)).await.is_empty());

        // Age both records, then refresh one so only the other is stale.
        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.touch_connection(2).await;

        let evicted = registry.evict_idle(Duration::from_millis(25)).await;
        assert_eq!(evicted, vec![idle]);
        assert!(registry.is_registered_connection(2).await);
    }
}
