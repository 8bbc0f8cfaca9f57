//! One blocking request/response exchange with a peer.
//!
//! [`RequestExecutor::execute`] sends a [`Request`] over a [`Connection`] and waits until one of the following
//! happens, whichever is first:
//!
//! - a [`Response`] carrying the request's id arrives on the connection,
//! - the [`PeerRegistry`] reports that the target peer connected or disconnected,
//! - the wait ceiling elapses.
//!
//! Any of these may race with the others from different threads. The first one wins; the rest are no-ops. The
//! listeners that the exchange registers are removed exactly once, whatever path completes it.

use crate::config::RpcConfig;
use crate::connection::{Connection, ListenerId, MessageListener, PeerEvent, PeerId, PeerListener, PeerRegistry};
use crate::errors::ConnectionFailure;
use crate::message_types::{Message, Request, RequestId, Response};
use futures::channel::oneshot;
use log::*;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// Drives a single request/response exchange against one peer connection.
pub struct RequestExecutor {
    connection: Arc<dyn Connection>,
    registry: Arc<dyn PeerRegistry>,
    timeout: Duration,
}

impl RequestExecutor {
    /// Create an executor using the default wait ceiling of [`RpcConfig`].
    pub fn new(connection: Arc<dyn Connection>, registry: Arc<dyn PeerRegistry>) -> Self {
        Self::from_config(connection, registry, &RpcConfig::default())
    }

    pub fn from_config(connection: Arc<dyn Connection>, registry: Arc<dyn PeerRegistry>, config: &RpcConfig) -> Self {
        Self { connection, registry, timeout: config.request_timeout() }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn peer_id(&self) -> &PeerId {
        self.connection.peer_id()
    }

    /// Send `request` and wait for the matching response.
    ///
    /// Fails immediately with a `NotConnected` [`ConnectionFailure`] if the connection is down; nothing is sent in
    /// that case. Fails with `TimeoutOrDisconnected` if no matching response was captured when the wait ends.
    pub async fn execute(&mut self, request: Request) -> Result<Response, ConnectionFailure> {
        let peer = self.connection.peer_id().clone();
        let request_id = request.request_id().clone();
        if !self.connection.is_connected() {
            debug!("Not sending request {request_id}: {peer} is not connected");
            return Err(ConnectionFailure::not_connected(peer));
        }

        let (sender, mut receiver) = oneshot::channel();
        let exchange = Exchange::new(
            request_id.clone(),
            peer.clone(),
            sender,
            Arc::clone(&self.connection),
            Arc::clone(&self.registry),
        );
        // Deregisters even if this future is dropped mid-wait.
        let _guard = ExchangeGuard(Arc::clone(&exchange));
        exchange.register();

        trace!("Sending request {request_id} to {peer}");
        if let Err(err) = self.connection.send(Message::Request(request)) {
            warn!("Could not send request {request_id} to {peer}. {err}");
            exchange.close();
            return Err(err);
        }

        let started = Instant::now();
        let waited = tokio::time::timeout(self.timeout, &mut receiver).await;
        exchange.close();
        let completion = match waited {
            Ok(Ok(completion)) => Some(completion),
            Ok(Err(_)) => None,
            // A trigger may have fired just as the timer did.
            Err(_) => receiver.try_recv().ok().flatten(),
        };

        match completion {
            Some(Completion::Answered(response)) => {
                debug!("Request {request_id} answered by {peer} after {:?}", started.elapsed());
                Ok(response)
            }
            Some(Completion::Aborted(event)) => {
                warn!("Request {request_id} aborted after {:?}: {event}", started.elapsed());
                Err(ConnectionFailure::timeout_or_disconnected(peer))
            }
            None => {
                warn!("Request {request_id} to {peer} timed out after {:?}", self.timeout);
                Err(ConnectionFailure::timeout_or_disconnected(peer))
            }
        }
    }
}

/// How an exchange was ended by one of its triggers.
#[derive(Debug)]
enum Completion {
    Answered(Response),
    Aborted(PeerEvent),
}

struct Registration {
    message_listener: ListenerId,
    peer_listener: ListenerId,
}

/// Shared state of one in-flight exchange, reachable from the waiting task and from the listener callbacks.
struct Exchange {
    request_id: RequestId,
    peer: PeerId,
    waiter: Mutex<Option<oneshot::Sender<Completion>>>,
    registration: Mutex<Option<Registration>>,
    connection: Arc<dyn Connection>,
    registry: Arc<dyn PeerRegistry>,
}

impl Exchange {
    fn new(
        request_id: RequestId,
        peer: PeerId,
        waiter: oneshot::Sender<Completion>,
        connection: Arc<dyn Connection>,
        registry: Arc<dyn PeerRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            request_id,
            peer,
            waiter: Mutex::new(Some(waiter)),
            registration: Mutex::new(None),
            connection,
            registry,
        })
    }

    /// Wire the peer-lifecycle listener and the message listener. Callbacks only hold a weak reference, so a
    /// listener that outlives the exchange (in a collaborator that is slow to drop it) does nothing.
    fn register(self: &Arc<Self>) {
        let weak: Weak<Exchange> = Arc::downgrade(self);
        let on_peer_event: PeerListener = Arc::new(move |event: &PeerEvent| {
            if let Some(exchange) = weak.upgrade() {
                exchange.on_peer_event(event);
            }
        });
        let weak: Weak<Exchange> = Arc::downgrade(self);
        let on_message: MessageListener = Arc::new(move |message: &Message| {
            if let Message::Response(response) = message {
                if let Some(exchange) = weak.upgrade() {
                    exchange.on_response(response);
                }
            }
        });
        let peer_listener = self.registry.add_peer_listener(on_peer_event);
        let message_listener = self.connection.add_message_listener(on_message);
        trace!("Request {} listening on {peer_listener} and {message_listener}", self.request_id);
        *lock(&self.registration) = Some(Registration { message_listener, peer_listener });
    }

    fn on_response(&self, response: &Response) {
        if response.answers(&self.request_id) {
            self.complete(Completion::Answered(response.clone()));
        } else {
            trace!("Request {} ignoring response to {}", self.request_id, response.request_id());
        }
    }

    fn on_peer_event(&self, event: &PeerEvent) {
        // Connects are treated like disconnects: a fresh link to the same peer cannot be trusted to carry the
        // answer to a request sent on the old one.
        if event.peer() == &self.peer {
            self.complete(Completion::Aborted(event.clone()));
        }
    }

    /// Hand `completion` to the waiting task if nobody else has, then deregister.
    fn complete(&self, completion: Completion) {
        let waiter = lock(&self.waiter).take();
        match waiter {
            Some(waiter) => {
                if waiter.send(completion).is_err() {
                    trace!("Request {} completed but its caller has gone", self.request_id);
                }
            }
            None => trace!("Request {} already completed. Ignoring {completion:?}", self.request_id),
        }
        self.deregister();
    }

    /// Stop accepting completions and deregister.
    fn close(&self) {
        lock(&self.waiter).take();
        self.deregister();
    }

    fn deregister(&self) {
        let registration = lock(&self.registration).take();
        if let Some(reg) = registration {
            if !self.connection.remove_message_listener(reg.message_listener) {
                debug!("Message listener {} for request {} was already gone", reg.message_listener, self.request_id);
            }
            if !self.registry.remove_peer_listener(reg.peer_listener) {
                debug!("Peer listener {} for request {} was already gone", reg.peer_listener, self.request_id);
            }
            trace!("Request {} deregistered its listeners", self.request_id);
        }
    }
}

struct ExchangeGuard(Arc<Exchange>);

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::connection::ListenerSet;
    use crate::dispatch::dispatch_sync;
    use crate::errors::RemoteError;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct TestConnection {
        peer: PeerId,
        connected: AtomicBool,
        listeners: ListenerSet<Message>,
        removals: AtomicUsize,
        sent: mpsc::UnboundedSender<Message>,
    }

    impl TestConnection {
        fn new(peer: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
            let (sent, outbox) = mpsc::unbounded_channel();
            let conn = Self {
                peer: PeerId::from(peer),
                connected: AtomicBool::new(true),
                listeners: ListenerSet::new(),
                removals: AtomicUsize::new(0),
                sent,
            };
            (Arc::new(conn), outbox)
        }

        fn deliver(&self, message: Message) {
            dispatch_sync(|| self.listeners.notify(&message));
        }
    }

    impl Connection for TestConnection {
        fn peer_id(&self) -> &PeerId {
            &self.peer
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn send(&self, message: Message) -> Result<(), ConnectionFailure> {
            self.sent.send(message).map_err(|_| ConnectionFailure::not_connected(self.peer.clone()))
        }

        fn add_message_listener(&self, listener: MessageListener) -> ListenerId {
            self.listeners.add(listener)
        }

        fn remove_message_listener(&self, id: ListenerId) -> bool {
            self.removals.fetch_add(1, Ordering::SeqCst);
            self.listeners.remove(id)
        }
    }

    #[derive(Default)]
    struct TestRegistry {
        listeners: ListenerSet<PeerEvent>,
        removals: AtomicUsize,
    }

    impl PeerRegistry for TestRegistry {
        fn add_peer_listener(&self, listener: PeerListener) -> ListenerId {
            self.listeners.add(listener)
        }

        fn remove_peer_listener(&self, id: ListenerId) -> bool {
            self.removals.fetch_add(1, Ordering::SeqCst);
            self.listeners.remove(id)
        }
    }

    fn executor(conn: &Arc<TestConnection>, registry: &Arc<TestRegistry>) -> RequestExecutor {
        RequestExecutor::new(conn.clone(), registry.clone())
    }

    fn assert_clean(conn: &TestConnection, registry: &TestRegistry) {
        assert!(conn.listeners.is_empty(), "message listener leaked");
        assert!(registry.listeners.is_empty(), "peer listener leaked");
        assert_eq!(conn.removals.load(Ordering::SeqCst), 1);
        assert_eq!(registry.removals.load(Ordering::SeqCst), 1);
    }

    async fn next_request(outbox: &mut mpsc::UnboundedReceiver<Message>) -> Request {
        match outbox.recv().await {
            Some(Message::Request(req)) => req,
            other => panic!("expected a request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_connected_fails_fast() {
        env_logger::try_init().ok();
        let (conn, mut outbox) = TestConnection::new("bob");
        let registry = Arc::new(TestRegistry::default());
        conn.connected.store(false, Ordering::SeqCst);
        let err = executor(&conn, &registry).execute(Request::value(json!("hi"))).await.unwrap_err();
        assert!(err.is_not_connected());
        assert_eq!(err.peer, PeerId::from("bob"));
        assert!(outbox.try_recv().is_err(), "nothing may be sent");
        assert_eq!(conn.removals.load(Ordering::SeqCst), 0);
        assert!(conn.listeners.is_empty());
    }

    #[tokio::test]
    async fn matching_response_is_returned() {
        env_logger::try_init().ok();
        let (conn, mut outbox) = TestConnection::new("bob");
        let registry = Arc::new(TestRegistry::default());
        let peer = {
            let conn = conn.clone();
            tokio::spawn(async move {
                let req = next_request(&mut outbox).await;
                // Stray answers to other requests, and unrelated traffic, must not complete the exchange.
                conn.deliver(Message::Response(Response::success(RequestId::from("stale"), json!("wrong"))));
                conn.deliver(Message::Notification(json!({"folder": "docs"})));
                conn.deliver(Message::Response(Response::answering(&req, Ok(json!("pong")))));
            })
        };
        let res = executor(&conn, &registry).execute(Request::value(json!("ping"))).await.expect("response");
        assert_eq!(res.outcome(), &Ok(json!("pong")));
        peer.await.unwrap();
        assert_clean(&conn, &registry);
    }

    #[tokio::test]
    async fn remote_failures_are_responses_too() {
        let (conn, mut outbox) = TestConnection::new("bob");
        let registry = Arc::new(TestRegistry::default());
        let peer = {
            let conn = conn.clone();
            tokio::spawn(async move {
                let req = next_request(&mut outbox).await;
                conn.deliver(Message::Response(Response::answering(&req, Err(RemoteError::internal("disk full")))));
            })
        };
        let res = executor(&conn, &registry).execute(Request::value(json!(1))).await.expect("response");
        assert!(!res.is_success());
        peer.await.unwrap();
        assert_clean(&conn, &registry);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_at_the_ceiling() {
        env_logger::try_init().ok();
        let (conn, _outbox) = TestConnection::new("bob");
        let registry = Arc::new(TestRegistry::default());
        let mut exec = executor(&conn, &registry);
        assert_eq!(exec.timeout(), Duration::from_secs(60));
        let start = Instant::now();
        let err = exec.execute(Request::value(json!("anyone?"))).await.unwrap_err();
        let elapsed = start.elapsed();
        assert!(err.is_timeout_or_disconnected());
        assert!(elapsed >= Duration::from_secs(60), "gave up early after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(61), "gave up late after {elapsed:?}");
        assert_clean(&conn, &registry);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_short_circuits_the_wait() {
        env_logger::try_init().ok();
        let (conn, _outbox) = TestConnection::new("bob");
        let registry = Arc::new(TestRegistry::default());
        {
            let registry = registry.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                registry.listeners.notify(&PeerEvent::Disconnected(PeerId::from("bob")));
            });
        }
        let start = Instant::now();
        let err = executor(&conn, &registry).execute(Request::value(json!(1))).await.unwrap_err();
        let elapsed = start.elapsed();
        assert!(err.is_timeout_or_disconnected());
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(150), "waited {elapsed:?}");
        assert_clean(&conn, &registry);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_also_aborts_but_other_peers_do_not() {
        let (conn, _outbox) = TestConnection::new("bob");
        let registry = Arc::new(TestRegistry::default());
        {
            let registry = registry.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                registry.listeners.notify(&PeerEvent::Disconnected(PeerId::from("carol")));
                registry.listeners.notify(&PeerEvent::Connected(PeerId::from("dave")));
                tokio::time::sleep(Duration::from_millis(10)).await;
                registry.listeners.notify(&PeerEvent::Connected(PeerId::from("bob")));
            });
        }
        let start = Instant::now();
        let err = executor(&conn, &registry).execute(Request::value(json!(1))).await.unwrap_err();
        assert!(err.is_timeout_or_disconnected());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(20) && elapsed < Duration::from_millis(30), "waited {elapsed:?}");
        assert_clean(&conn, &registry);
    }

    #[tokio::test]
    async fn concurrent_exchanges_get_their_own_answers() {
        let (conn, mut outbox) = TestConnection::new("bob");
        let registry = Arc::new(TestRegistry::default());
        let peer = {
            let conn = conn.clone();
            tokio::spawn(async move {
                let first = next_request(&mut outbox).await;
                let second = next_request(&mut outbox).await;
                // Answer in reverse order; each answer echoes its own request's payload.
                for req in [second, first] {
                    let echo = match req.payload() {
                        crate::message_types::RequestPayload::Value(v) => v.clone(),
                        other => panic!("unexpected payload {other:?}"),
                    };
                    conn.deliver(Message::Response(Response::answering(&req, Ok(echo))));
                }
            })
        };
        let mut a = executor(&conn, &registry);
        let mut b = executor(&conn, &registry);
        let (ra, rb) =
            tokio::join!(a.execute(Request::value(json!("A"))), b.execute(Request::value(json!("B"))));
        assert_eq!(ra.unwrap().into_outcome(), Ok(json!("A")));
        assert_eq!(rb.unwrap().into_outcome(), Ok(json!("B")));
        peer.await.unwrap();
        assert!(conn.listeners.is_empty());
        assert!(registry.listeners.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn racing_triggers_clean_up_exactly_once() {
        env_logger::try_init().ok();
        for _ in 0..50 {
            let (conn, mut outbox) = TestConnection::new("bob");
            let registry = Arc::new(TestRegistry::default());
            let trigger = {
                let conn = conn.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    let req = next_request(&mut outbox).await;
                    let barrier = Arc::new(std::sync::Barrier::new(2));
                    let answer = {
                        let barrier = barrier.clone();
                        std::thread::spawn(move || {
                            barrier.wait();
                            conn.deliver(Message::Response(Response::answering(&req, Ok(json!("ok")))));
                        })
                    };
                    let abort = std::thread::spawn(move || {
                        barrier.wait();
                        registry.listeners.notify(&PeerEvent::Disconnected(PeerId::from("bob")));
                    });
                    answer.join().expect("answer thread");
                    abort.join().expect("abort thread");
                })
            };
            let result = executor(&conn, &registry).execute(Request::value(json!("race"))).await;
            trigger.await.unwrap();
            match result {
                Ok(res) => assert_eq!(res.into_outcome(), Ok(json!("ok"))),
                Err(err) => assert!(err.is_timeout_or_disconnected()),
            }
            assert_clean(&conn, &registry);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_call_deregisters() {
        let (conn, _outbox) = TestConnection::new("bob");
        let registry = Arc::new(TestRegistry::default());
        let mut exec = executor(&conn, &registry);
        let abandoned = tokio::time::timeout(Duration::from_secs(1), exec.execute(Request::value(json!(1)))).await;
        assert!(abandoned.is_err());
        assert_clean(&conn, &registry);
    }
}
