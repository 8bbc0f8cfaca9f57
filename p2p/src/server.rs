use crate::connection::{Connection, ListenerId, MessageListener, PeerId};
use crate::dispatch::dispatch_scope;
use crate::errors::RemoteError;
use crate::message_types::{Message, MethodCall, Request, RequestPayload, Response};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use log::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;

/// Produces the outcome for an inbound request. The serving loop wraps it in a [`Response`] that carries the
/// request's id.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, from: &PeerId, payload: RequestPayload) -> Result<Value, RemoteError>;
}

/// The serving side of one service: receives an operation name and its arguments.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn invoke(&self, operation: &str, args: Vec<Value>) -> Result<Value, RemoteError>;
}

/// Routes method calls to the services registered under their service id.
#[derive(Default)]
pub struct ServiceProvider {
    services: RwLock<HashMap<String, Arc<dyn ServiceHandler>>>,
}

impl ServiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `service_id`, replacing and returning any previous handler.
    pub fn register(
        &self,
        service_id: impl Into<String>,
        handler: Arc<dyn ServiceHandler>,
    ) -> Option<Arc<dyn ServiceHandler>> {
        let service_id = service_id.into();
        debug!("Registering service {service_id}");
        let mut lock = self.services.write().unwrap_or_else(|p| p.into_inner());
        lock.insert(service_id, handler)
    }

    pub fn unregister(&self, service_id: &str) -> Option<Arc<dyn ServiceHandler>> {
        let mut lock = self.services.write().unwrap_or_else(|p| p.into_inner());
        lock.remove(service_id)
    }

    pub fn service(&self, service_id: &str) -> Option<Arc<dyn ServiceHandler>> {
        let lock = self.services.read().unwrap_or_else(|p| p.into_inner());
        lock.get(service_id).cloned()
    }

    pub fn service_ids(&self) -> Vec<String> {
        let lock = self.services.read().unwrap_or_else(|p| p.into_inner());
        lock.keys().cloned().collect()
    }

    pub async fn call(&self, call: MethodCall) -> Result<Value, RemoteError> {
        let MethodCall { service, operation, args } = call;
        let handler = self.service(&service).ok_or_else(|| RemoteError::unknown_service(&service))?;
        trace!("Invoking {service}.{operation} with {} argument(s)", args.len());
        handler.invoke(&operation, args).await
    }
}

#[async_trait]
impl RequestHandler for ServiceProvider {
    async fn handle(&self, from: &PeerId, payload: RequestPayload) -> Result<Value, RemoteError> {
        match payload {
            RequestPayload::MethodCall(call) => self.call(call).await,
            RequestPayload::Value(_) => {
                warn!("{from} sent a plain value request, but only method calls are served here");
                Err(RemoteError::new(RemoteError::UNSUPPORTED_PAYLOAD, "Only method calls are accepted"))
            }
        }
    }
}

/// Answers requests arriving on one connection.
///
/// Inbound requests are forwarded from the connection's message listener into a channel, and a single task answers
/// them in arrival order. Handlers run inside the dispatch context, so they cannot make remote calls of their own.
pub struct RequestServer {
    connection: Arc<dyn Connection>,
    listener: ListenerId,
    task: JoinHandle<()>,
}

impl RequestServer {
    /// Start serving `connection` with `handler`. Must be called from within a tokio runtime.
    pub fn spawn(connection: Arc<dyn Connection>, handler: Arc<dyn RequestHandler>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded::<Request>();
        let peer = connection.peer_id().clone();
        let forward: MessageListener = {
            let peer = peer.clone();
            Arc::new(move |message: &Message| {
                if let Message::Request(request) = message {
                    if let Err(e) = inbound_tx.unbounded_send(request.clone()) {
                        warn!("Dropping request {} from {peer}: {e}", request.request_id());
                    }
                }
            })
        };
        let listener = connection.add_message_listener(forward);
        debug!("Serving requests from {peer}");
        let task = tokio::spawn(serve(Arc::clone(&connection), handler, inbound_rx));
        Self { connection, listener, task }
    }

    pub fn peer_id(&self) -> &PeerId {
        self.connection.peer_id()
    }

    /// `true` once the serving task has stopped, e.g. because the connection dropped its listeners.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop accepting requests and wait for the request currently being handled, if any.
    pub async fn shutdown(self) {
        self.connection.remove_message_listener(self.listener);
        if let Err(err) = self.task.await {
            error!("Request server for {} ended abnormally: {err}", self.connection.peer_id());
        }
    }
}

async fn serve(
    connection: Arc<dyn Connection>,
    handler: Arc<dyn RequestHandler>,
    mut inbound: mpsc::UnboundedReceiver<Request>,
) {
    let peer = connection.peer_id().clone();
    while let Some(request) = inbound.next().await {
        trace!("Handling request {} from {peer}", request.request_id());
        let response = dispatch_scope(answer(handler.as_ref(), &peer, request)).await;
        if let Err(err) = connection.send(Message::Response(response)) {
            warn!("Could not deliver response to {peer}. {err}");
        }
    }
    debug!("Stopped serving requests from {peer}");
}

async fn answer(handler: &dyn RequestHandler, from: &PeerId, request: Request) -> Response {
    let (request_id, payload) = request.into_parts();
    let outcome = handler.handle(from, payload).await;
    if let Err(err) = &outcome {
        debug!("Request {request_id} from {from} failed. {err}");
    }
    match outcome {
        Ok(value) => Response::success(request_id, value),
        Err(err) => Response::failure(request_id, err),
    }
}
