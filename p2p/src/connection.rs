//! Contracts for the collaborators a remote call relies on.
//!
//! The remote-call layer does not own any transport. It needs a [`Connection`] to a peer, which can send
//! messages and report inbound ones to listeners, and a [`PeerRegistry`] that reports when peers connect or
//! disconnect. Both are injected, so the same executor runs over the in-memory transport in tests and over a real
//! network link in the application.

use crate::errors::ConnectionFailure;
use crate::message_types::Message;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// The identity of a peer (node) in the sync network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Peer lifecycle notifications emitted by a [`PeerRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connected(PeerId),
    Disconnected(PeerId),
}

impl PeerEvent {
    pub fn peer(&self) -> &PeerId {
        match self {
            PeerEvent::Connected(p) | PeerEvent::Disconnected(p) => p,
        }
    }
}

impl Display for PeerEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::Connected(p) => write!(f, "{p} connected"),
            PeerEvent::Disconnected(p) => write!(f, "{p} disconnected"),
        }
    }
}

/// Handle returned when registering a listener; pass it back to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ListenerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type MessageListener = Arc<dyn Fn(&Message) + Send + Sync>;
pub type PeerListener = Arc<dyn Fn(&PeerEvent) + Send + Sync>;

/// A logical link to one remote peer.
pub trait Connection: Send + Sync {
    /// The peer at the other end of this connection.
    fn peer_id(&self) -> &PeerId;

    fn is_connected(&self) -> bool;

    /// Queue a message for the peer. This does not wait for delivery.
    fn send(&self, message: Message) -> Result<(), ConnectionFailure>;

    /// Register a callback invoked for every message arriving from the peer.
    fn add_message_listener(&self, listener: MessageListener) -> ListenerId;

    /// Returns `false` if no listener was registered under `id`.
    fn remove_message_listener(&self, id: ListenerId) -> bool;
}

/// Process-wide source of peer connect/disconnect events.
pub trait PeerRegistry: Send + Sync {
    fn add_peer_listener(&self, listener: PeerListener) -> ListenerId;

    /// Returns `false` if no listener was registered under `id`.
    fn remove_peer_listener(&self, id: ListenerId) -> bool;
}

/// A thread-safe table of callbacks.
///
/// Listeners are invoked on a snapshot taken under the lock, and the lock is released before any callback runs, so
/// a callback may add or remove listeners (including itself) without deadlocking.
pub struct ListenerSet<E: ?Sized> {
    listeners: Mutex<BTreeMap<ListenerId, Arc<dyn Fn(&E) + Send + Sync>>>,
}

impl<E: ?Sized> Default for ListenerSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ?Sized> ListenerSet<E> {
    pub fn new() -> Self {
        Self { listeners: Mutex::new(BTreeMap::new()) }
    }

    pub fn add(&self, listener: Arc<dyn Fn(&E) + Send + Sync>) -> ListenerId {
        let id = ListenerId::next();
        self.lock().insert(id, listener);
        trace!("Listener {id} registered");
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            trace!("Listener {id} removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Invoke every registered listener with `event`, in registration order.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<_> = self.lock().values().cloned().collect();
        for listener in snapshot {
            listener(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ListenerId, Arc<dyn Fn(&E) + Send + Sync>>> {
        // A panicking listener never runs under this lock, so the map itself is always consistent.
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
