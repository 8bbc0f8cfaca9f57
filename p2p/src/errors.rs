use crate::connection::PeerId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Why an exchange with a peer could not produce a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionFailureKind {
    /// The connection reported itself as disconnected before anything was sent.
    NotConnected,
    /// The wait ended without a matching response: the ceiling elapsed, or the peer connected/disconnected.
    TimeoutOrDisconnected,
}

impl Display for ConnectionFailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionFailureKind::NotConnected => write!(f, "not connected"),
            ConnectionFailureKind::TimeoutOrDisconnected => {
                write!(f, "no response received (timeout or peer disconnected)")
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Connection to {peer} failed: {kind}")]
pub struct ConnectionFailure {
    pub kind: ConnectionFailureKind,
    pub peer: PeerId,
}

impl ConnectionFailure {
    pub fn not_connected(peer: PeerId) -> Self {
        Self { kind: ConnectionFailureKind::NotConnected, peer }
    }

    pub fn timeout_or_disconnected(peer: PeerId) -> Self {
        Self { kind: ConnectionFailureKind::TimeoutOrDisconnected, peer }
    }

    pub fn is_not_connected(&self) -> bool {
        self.kind == ConnectionFailureKind::NotConnected
    }

    pub fn is_timeout_or_disconnected(&self) -> bool {
        self.kind == ConnectionFailureKind::TimeoutOrDisconnected
    }
}

/// An error reported by the remote peer's handler, akin to an HTTP error body.
///
/// `error_type` names the error so that the calling side can decide whether it is one of the errors the invoked
/// operation declares. `detail` carries the serialized error value for declared errors, and is `Null` otherwise.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{error_type}: {message}")]
pub struct RemoteError {
    pub error_type: String,
    pub message: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl RemoteError {
    pub const UNKNOWN_SERVICE: &'static str = "UnknownService";
    pub const UNKNOWN_OPERATION: &'static str = "UnknownOperation";
    pub const UNSUPPORTED_PAYLOAD: &'static str = "UnsupportedPayload";
    pub const INVALID_ARGUMENTS: &'static str = "InvalidArguments";
    pub const INTERNAL: &'static str = "Internal";

    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self { error_type: error_type.into(), message: message.into(), detail: serde_json::Value::Null }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, msg)
    }

    pub fn unknown_service(service: &str) -> Self {
        Self::new(Self::UNKNOWN_SERVICE, format!("No service registered as '{service}'"))
    }

    pub fn unknown_operation(service: &str, operation: &str) -> Self {
        Self::new(Self::UNKNOWN_OPERATION, format!("Service '{service}' has no operation '{operation}'"))
    }

    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::new(Self::INVALID_ARGUMENTS, msg)
    }

    /// Encode an error that an operation declares as part of its contract.
    pub fn declared<E: Serialize + Display>(error_type: &str, error: &E) -> Self {
        match serde_json::to_value(error) {
            Ok(detail) => Self { error_type: error_type.to_string(), message: error.to_string(), detail },
            Err(e) => Self::internal(format!("Could not serialize {error_type}: {e}")),
        }
    }

    /// Decode the detail of this error as `E`, if it was encoded under `error_type`.
    pub fn decode<E: DeserializeOwned>(&self, error_type: &str) -> Option<E> {
        if self.error_type != error_type {
            return None;
        }
        serde_json::from_value(self.detail.clone()).ok()
    }
}

/// Failures surfaced by a [`crate::RemoteCallStub`] invocation.
#[derive(Error, Debug)]
pub enum RemoteCallFailure {
    #[error("Remote call failed. {0}")]
    Connection(#[from] ConnectionFailure),
    #[error("Remote calls may not be made from within message dispatch, as this would deadlock the dispatcher.")]
    IllegalReentrantCall,
    #[error("The remote peer reported an error. {0}")]
    Remote(RemoteError),
    #[error("Service '{service}' does not declare operation '{operation}' taking {arity} argument(s).")]
    UnknownOperation { service: String, operation: String, arity: usize },
    #[error("The remote peer returned a value of an unexpected type. {0}")]
    UnexpectedReturn(serde_json::Error),
    #[error("Could not serialize call arguments. {0}")]
    Serialization(serde_json::Error),
}

impl RemoteCallFailure {
    pub fn is_reentrant_call(&self) -> bool {
        matches!(self, RemoteCallFailure::IllegalReentrantCall)
    }

    pub fn connection_failure(&self) -> Option<&ConnectionFailure> {
        match self {
            RemoteCallFailure::Connection(c) => Some(c),
            _ => None,
        }
    }
}
