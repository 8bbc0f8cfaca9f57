//! Synchronous remote calls between peers.
//!
//! A caller invokes an operation on a [`RemoteCallStub`]; the stub packs it into a [`Request`] and hands it to a
//! fresh [`RequestExecutor`], which sends it over the peer's [`Connection`] and waits for the [`Response`] with the
//! same [`RequestId`], a connect/disconnect of that peer, or the wait ceiling. On the other side, a
//! [`RequestServer`] feeds inbound requests to a [`ServiceProvider`] and sends back the answers.

mod config;
pub mod connection;
pub mod dispatch;
pub mod errors;
mod executor;
pub mod memory;
pub mod message_types;
mod server;
pub mod stub;

pub use serde_json;

pub use config::{RpcConfig, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use connection::{Connection, ListenerId, MessageListener, PeerEvent, PeerId, PeerListener, PeerRegistry};
pub use errors::{ConnectionFailure, ConnectionFailureKind, RemoteCallFailure, RemoteError};
pub use executor::RequestExecutor;
pub use memory::{MemoryConnection, MemoryPeer, MemoryPeerRegistry};
pub use message_types::{Message, MethodCall, Request, RequestId, RequestPayload, Response};
pub use server::{RequestHandler, RequestServer, ServiceHandler, ServiceProvider};
pub use stub::{DeclaredError, OperationDescriptor, RemoteCallStub, ServiceContract};
