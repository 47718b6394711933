//! ConnectionRegistry - live client connections and snapshot delivery

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::balance::{BalanceSnapshot, RefreshHandle};

pub type ConnectionId = u64;

/// Snapshots buffered per connection before it counts as stalled.
pub const OUTBOUND_QUEUE: usize = 32;

/// A registered connection: its id and the queue its writer drains.
pub struct ClientConnection {
    pub id: ConnectionId,
    pub outbound: mpsc::Receiver<String>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: ConnectionId,
    live: HashMap<ConnectionId, mpsc::Sender<String>>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Add a connection to the live set.
    pub fn register(&self) -> ClientConnection {
        let (tx, outbound) = mpsc::channel(OUTBOUND_QUEUE);
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.live.insert(id, tx);
        ClientConnection { id, outbound }
    }

    /// Register and immediately request a refresh scoped to the new connection.
    pub fn on_connect(&self, refresh: &RefreshHandle) -> ClientConnection {
        let conn = self.register();
        if !refresh.only(conn.id) {
            tracing::warn!(id = conn.id, "refresh worker gone; no initial snapshot");
        }
        conn
    }

    /// Remove a connection. Removing twice is a no-op; returns whether it was live.
    pub fn on_disconnect(&self, id: ConnectionId) -> bool {
        self.lock().live.remove(&id).is_some()
    }

    pub fn is_live(&self, id: ConnectionId) -> bool { self.lock().live.contains_key(&id) }

    pub fn live_count(&self) -> usize { self.lock().live.len() }

    /// Send to every live connection. Returns how many accepted it.
    pub fn broadcast(&self, snapshot: &BalanceSnapshot) -> usize {
        self.send_where(snapshot, |_| true)
    }

    /// Send to the given connections; ids no longer live are skipped.
    pub fn deliver(&self, ids: &BTreeSet<ConnectionId>, snapshot: &BalanceSnapshot) -> usize {
        self.send_where(snapshot, |id| ids.contains(&id))
    }

    fn send_where(&self, snapshot: &BalanceSnapshot, include: impl Fn(ConnectionId) -> bool) -> usize {
        let message = match snapshot.to_message() {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize snapshot");
                return 0;
            }
        };

        let mut inner = self.lock();
        let mut failed = Vec::new();
        let mut delivered = 0;
        for (&id, tx) in inner.live.iter().filter(|(id, _)| include(**id)) {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(id, "client not keeping up; disconnecting");
                    failed.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(id, "client already closed");
                    failed.push(id);
                }
            }
        }
        // Dropping the sender ends the connection's writer, which closes the socket.
        for id in failed {
            inner.live.remove(&id);
        }
        delivered
    }
}
