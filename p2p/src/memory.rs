//! An in-process transport.
//!
//! Two [`MemoryPeer`]s are linked with [`MemoryPeer::connect`], which returns one [`MemoryConnection`] per side.
//! Each side has a dispatch task delivering inbound messages to its listeners, in order, one at a time. Peer
//! lifecycle events are published on each peer's [`MemoryPeerRegistry`].

use crate::connection::{
    Connection, ListenerId, ListenerSet, MessageListener, PeerEvent, PeerId, PeerListener, PeerRegistry,
};
use crate::dispatch::dispatch_sync;
use crate::errors::ConnectionFailure;
use crate::message_types::Message;
use futures::channel::mpsc;
use futures::StreamExt;
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Publishes peer connect/disconnect events to registered listeners.
#[derive(Default)]
pub struct MemoryPeerRegistry {
    listeners: ListenerSet<PeerEvent>,
}

impl MemoryPeerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notify(&self, event: PeerEvent) {
        debug!("Peer event: {event}");
        dispatch_sync(|| self.listeners.notify(&event));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl PeerRegistry for MemoryPeerRegistry {
    fn add_peer_listener(&self, listener: PeerListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_peer_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

/// A node taking part in an in-memory network.
#[derive(Clone)]
pub struct MemoryPeer {
    id: PeerId,
    registry: Arc<MemoryPeerRegistry>,
}

impl MemoryPeer {
    pub fn new(id: impl Into<PeerId>) -> Self {
        Self { id: id.into(), registry: MemoryPeerRegistry::new() }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn registry(&self) -> Arc<MemoryPeerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Link this peer with `other`. The first connection is this peer's view of `other`, the second is `other`'s
    /// view of this peer. Must be called from within a tokio runtime.
    pub fn connect(&self, other: &MemoryPeer) -> (Arc<MemoryConnection>, Arc<MemoryConnection>) {
        let (to_other, other_inbox) = mpsc::unbounded();
        let (to_self, self_inbox) = mpsc::unbounded();
        let link = Arc::new(Link {
            connected: AtomicBool::new(true),
            sides: [
                Side { owner: self.clone(), listeners: Arc::new(ListenerSet::new()), outbound: to_other },
                Side { owner: other.clone(), listeners: Arc::new(ListenerSet::new()), outbound: to_self },
            ],
        });
        tokio::spawn(deliver(Arc::downgrade(&link), 0, self_inbox));
        tokio::spawn(deliver(Arc::downgrade(&link), 1, other_inbox));
        info!("{} and {} connected", self.id, other.id);
        self.registry.notify(PeerEvent::Connected(other.id.clone()));
        other.registry.notify(PeerEvent::Connected(self.id.clone()));
        let ours = Arc::new(MemoryConnection { link: Arc::clone(&link), side: 0 });
        let theirs = Arc::new(MemoryConnection { link, side: 1 });
        (ours, theirs)
    }
}

struct Side {
    owner: MemoryPeer,
    listeners: Arc<ListenerSet<Message>>,
    /// Messages from `owner` to the other side.
    outbound: mpsc::UnboundedSender<Message>,
}

struct Link {
    connected: AtomicBool,
    sides: [Side; 2],
}

/// One end of an in-memory link.
pub struct MemoryConnection {
    link: Arc<Link>,
    side: usize,
}

impl MemoryConnection {
    fn local(&self) -> &Side {
        &self.link.sides[self.side]
    }

    fn remote(&self) -> &Side {
        &self.link.sides[1 - self.side]
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local().owner.id
    }

    pub fn listener_count(&self) -> usize {
        self.local().listeners.len()
    }

    /// Tear the link down. Both peers' registries see a `Disconnected` event, messages still in flight are
    /// dropped, and both ends forget their listeners.
    pub fn disconnect(&self) {
        if !self.link.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("{} and {} disconnected", self.local().owner.id, self.remote().owner.id);
        for side in &self.link.sides {
            side.outbound.close_channel();
        }
        let (local, remote) = (&self.local().owner, &self.remote().owner);
        local.registry.notify(PeerEvent::Disconnected(remote.id.clone()));
        remote.registry.notify(PeerEvent::Disconnected(local.id.clone()));
        for side in &self.link.sides {
            side.listeners.clear();
        }
    }

    /// Publish a `Connected` event for the remote peer on the local registry, as a peer registry does when the same
    /// peer connects again.
    pub fn announce_reconnect(&self) {
        self.local().owner.registry.notify(PeerEvent::Connected(self.remote().owner.id.clone()));
    }
}

impl Connection for MemoryConnection {
    fn peer_id(&self) -> &PeerId {
        &self.remote().owner.id
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    fn send(&self, message: Message) -> Result<(), ConnectionFailure> {
        if !self.is_connected() {
            return Err(ConnectionFailure::not_connected(self.peer_id().clone()));
        }
        trace!("{} -> {}: {message}", self.local_peer_id(), self.peer_id());
        self.local()
            .outbound
            .unbounded_send(message)
            .map_err(|_| ConnectionFailure::not_connected(self.peer_id().clone()))
    }

    fn add_message_listener(&self, listener: MessageListener) -> ListenerId {
        self.local().listeners.add(listener)
    }

    fn remove_message_listener(&self, id: ListenerId) -> bool {
        self.local().listeners.remove(id)
    }
}

async fn deliver(link: Weak<Link>, side: usize, mut inbox: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = inbox.next().await {
        let Some(link) = link.upgrade() else { break };
        if !link.connected.load(Ordering::SeqCst) {
            trace!("Dropping {message}: link is down");
            continue;
        }
        let listeners = Arc::clone(&link.sides[side].listeners);
        drop(link);
        dispatch_sync(|| listeners.notify(&message));
    }
    trace!("Delivery task stopped");
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn messages_flow_both_ways_in_order() {
        let alice = MemoryPeer::new("alice");
        let bob = MemoryPeer::new("bob");
        let (to_bob, to_alice) = alice.connect(&bob);
        assert_eq!(to_bob.peer_id().as_str(), "bob");
        assert_eq!(to_alice.peer_id().as_str(), "alice");
        assert_eq!(to_bob.local_peer_id().as_str(), "alice");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        to_alice.add_message_listener(Arc::new(move |m: &Message| {
            assert!(crate::dispatch::in_dispatch());
            tx.send(m.clone()).ok();
        }));
        for i in 0..5 {
            to_bob.send(Message::Notification(json!(i))).expect("send");
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await, Some(Message::Notification(json!(i))));
        }
    }

    #[tokio::test]
    async fn disconnect_notifies_both_registries_and_stops_sends() {
        let alice = MemoryPeer::new("alice");
        let bob = MemoryPeer::new("bob");
        let (to_bob, to_alice) = alice.connect(&bob);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for peer in [&alice, &bob] {
            let seen = seen.clone();
            peer.registry().add_peer_listener(Arc::new(move |e: &PeerEvent| seen.lock().unwrap().push(e.clone())));
        }
        to_alice.add_message_listener(Arc::new(|_: &Message| {}));
        to_bob.disconnect();
        to_bob.disconnect();
        assert!(!to_bob.is_connected());
        assert!(!to_alice.is_connected());
        assert_eq!(to_alice.listener_count(), 0);
        let err = to_alice.send(Message::Notification(json!(1))).unwrap_err();
        assert!(err.is_not_connected());
        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![PeerEvent::Disconnected(PeerId::from("bob")), PeerEvent::Disconnected(PeerId::from("alice"))]
        );
    }

    #[tokio::test]
    async fn in_flight_messages_are_dropped_after_disconnect() {
        let alice = MemoryPeer::new("alice");
        let bob = MemoryPeer::new("bob");
        let (to_bob, to_alice) = alice.connect(&bob);
        let count = Arc::new(Mutex::new(0));
        {
            let count = count.clone();
            to_alice.add_message_listener(Arc::new(move |_: &Message| *count.lock().unwrap() += 1));
        }
        to_bob.send(Message::Notification(json!("late"))).expect("send");
        to_bob.disconnect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn announce_reconnect_publishes_on_the_local_registry() {
        let alice = MemoryPeer::new("alice");
        let bob = MemoryPeer::new("bob");
        let (to_bob, _to_alice) = alice.connect(&bob);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            alice.registry().add_peer_listener(Arc::new(move |e: &PeerEvent| seen.lock().unwrap().push(e.clone())));
        }
        to_bob.announce_reconnect();
        assert_eq!(*seen.lock().unwrap(), vec![PeerEvent::Connected(PeerId::from("bob"))]);
        assert_eq!(alice.registry().listener_count(), 1);
        assert_eq!(bob.registry().listener_count(), 0);
    }
}
