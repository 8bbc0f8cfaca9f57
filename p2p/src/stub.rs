//! Client-side proxies for remote services.
//!
//! A service is described once by a [`ServiceContract`]: its id and the operations it exposes, with the error
//! types each operation declares. A [`RemoteCallStub`] binds a contract to a peer connection and turns every
//! invocation into one independent request/response exchange.
//!
//! Typed proxies are written as a struct holding a `stub` field plus one [`remote_operation!`](crate::remote_operation)
//! per operation:
//!
//! ```ignore
//! pub struct FolderServiceStub {
//!     stub: RemoteCallStub,
//! }
//!
//! impl FolderServiceStub {
//!     remote_operation!(list_files => "listFiles" (folder: &str) -> Vec<String>, FolderError);
//!     remote_operation!(ping => "ping" () -> (), RemoteCallFailure);
//! }
//! ```

use crate::config::RpcConfig;
use crate::connection::{Connection, PeerId, PeerRegistry};
use crate::dispatch::in_dispatch;
use crate::errors::{RemoteCallFailure, RemoteError};
use crate::executor::RequestExecutor;
use crate::message_types::Request;
use log::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One operation of a service: its name, how many arguments it takes and which remote errors it may raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    name: String,
    arity: usize,
    declared_errors: Vec<String>,
}

impl OperationDescriptor {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self { name: name.into(), arity, declared_errors: Vec::new() }
    }

    /// Declare `error_type` as an acceptable outcome of this operation.
    pub fn declares(mut self, error_type: impl Into<String>) -> Self {
        self.declared_errors.push(error_type.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn is_declared(&self, error_type: &str) -> bool {
        self.declared_errors.iter().any(|e| e == error_type)
    }
}

/// The dispatch table for one service.
#[derive(Debug, Clone)]
pub struct ServiceContract {
    service_id: String,
    operations: HashMap<String, OperationDescriptor>,
}

impl ServiceContract {
    pub fn builder(service_id: impl Into<String>) -> ServiceContractBuilder {
        ServiceContractBuilder { service_id: service_id.into(), operations: HashMap::new() }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn operation(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.get(name)
    }

    pub fn operations(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.operations.values()
    }
}

pub struct ServiceContractBuilder {
    service_id: String,
    operations: HashMap<String, OperationDescriptor>,
}

impl ServiceContractBuilder {
    pub fn operation(mut self, descriptor: OperationDescriptor) -> Self {
        if self.operations.contains_key(descriptor.name()) {
            warn!("Operation {}.{} declared twice; keeping the last one", self.service_id, descriptor.name());
        }
        self.operations.insert(descriptor.name.clone(), descriptor);
        self
    }

    pub fn build(self) -> Arc<ServiceContract> {
        Arc::new(ServiceContract { service_id: self.service_id, operations: self.operations })
    }
}

/// Error types that a remote operation can re-raise on the calling side.
///
/// Every error type returned from [`RemoteCallStub::invoke`] must be able to absorb a [`RemoteCallFailure`].
/// `from_remote` recognises the remote errors that are really this type; those are returned as-is when the invoked
/// operation declares them, anything else becomes a wrapped [`RemoteCallFailure::Remote`].
pub trait DeclaredError: From<RemoteCallFailure> {
    fn from_remote(error: &RemoteError) -> Option<Self>;
}

impl DeclaredError for RemoteCallFailure {
    fn from_remote(_: &RemoteError) -> Option<Self> {
        None
    }
}

/// A local stand-in for a service hosted by a remote peer.
#[derive(Clone)]
pub struct RemoteCallStub {
    contract: Arc<ServiceContract>,
    connection: Arc<dyn Connection>,
    registry: Arc<dyn PeerRegistry>,
    config: RpcConfig,
}

impl RemoteCallStub {
    pub fn new(
        contract: Arc<ServiceContract>,
        connection: Arc<dyn Connection>,
        registry: Arc<dyn PeerRegistry>,
    ) -> Self {
        Self { contract, connection, registry, config: RpcConfig::default() }
    }

    pub fn with_config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    pub fn service_id(&self) -> &str {
        self.contract.service_id()
    }

    pub fn contract(&self) -> &ServiceContract {
        &self.contract
    }

    pub fn peer_id(&self) -> &PeerId {
        self.connection.peer_id()
    }

    /// Call `operation` on the remote service and wait for its result.
    ///
    /// Remote calls cannot be made from code that is handling an inbound message; they fail with
    /// [`RemoteCallFailure::IllegalReentrantCall`] without sending anything.
    pub async fn invoke<R, E>(&self, operation: &str, args: Vec<Value>) -> Result<R, E>
    where
        R: DeserializeOwned,
        E: DeclaredError,
    {
        let service = self.contract.service_id();
        if in_dispatch() {
            warn!("Refusing to call {service}.{operation} from within message dispatch");
            return Err(RemoteCallFailure::IllegalReentrantCall.into());
        }
        let descriptor =
            self.contract.operation(operation).filter(|op| op.arity() == args.len()).ok_or_else(|| {
                RemoteCallFailure::UnknownOperation {
                    service: service.to_string(),
                    operation: operation.to_string(),
                    arity: args.len(),
                }
            })?;

        let request = Request::method_call(service, operation, args);
        debug!("Calling {service}.{operation} on {} (request {})", self.peer_id(), request.request_id());
        let mut executor =
            RequestExecutor::from_config(Arc::clone(&self.connection), Arc::clone(&self.registry), &self.config);
        let response = executor.execute(request).await.map_err(RemoteCallFailure::from)?;

        match response.into_outcome() {
            Ok(value) => serde_json::from_value(value).map_err(|e| E::from(RemoteCallFailure::UnexpectedReturn(e))),
            Err(remote) => {
                if descriptor.is_declared(&remote.error_type) {
                    match E::from_remote(&remote) {
                        Some(err) => return Err(err),
                        None => {
                            warn!("{service}.{operation} declares {} but it could not be decoded", remote.error_type)
                        }
                    }
                }
                debug!("{service}.{operation} failed remotely. {remote}");
                Err(RemoteCallFailure::Remote(remote).into())
            }
        }
    }
}

/// Serialize one call argument.
pub fn to_argument<T: Serialize + ?Sized>(value: &T) -> Result<Value, RemoteCallFailure> {
    serde_json::to_value(value).map_err(RemoteCallFailure::Serialization)
}

/// Generate a typed async method that forwards to the `stub: RemoteCallStub` field of `self`.
///
/// `remote_operation!(method => "operation" (arg: Type, ...) -> Return, Error);`
#[macro_export]
macro_rules! remote_operation {
    ($(#[$meta:meta])* $name:ident => $operation:literal ($($arg:ident : $ty:ty),* $(,)?) -> $ret:ty, $err:ty) => {
        $(#[$meta])*
        pub async fn $name(&self, $($arg: $ty),*) -> ::std::result::Result<$ret, $err> {
            let args: ::std::vec::Vec<$crate::serde_json::Value> = ::std::vec![$($crate::stub::to_argument(&$arg)?),*];
            self.stub.invoke::<$ret, $err>($operation, args).await
        }
    };
}
