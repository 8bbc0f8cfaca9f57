use crate::errors::RemoteError;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// Correlation key linking a [`Request`] to the [`Response`] that answers it.
///
/// Ids are 128 random bits rendered as lowercase hex, so two requests never share an id in practice, even when
/// they are issued by different peers over the same connection.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn random() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifies one operation of a remote service along with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub service: String,
    pub operation: String,
    pub args: Vec<serde_json::Value>,
}

/// The operation-specific part of a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestPayload {
    /// Invoke an operation on a service registered with the peer's service provider.
    MethodCall(MethodCall),
    /// An opaque value for handlers that do not follow the service/operation model.
    Value(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    request_id: RequestId,
    payload: RequestPayload,
}

impl Request {
    /// Create a new request with a fresh correlation id.
    pub fn new(payload: RequestPayload) -> Self {
        Self { request_id: RequestId::random(), payload }
    }

    pub fn method_call(
        service: impl Into<String>,
        operation: impl Into<String>,
        args: Vec<serde_json::Value>,
    ) -> Self {
        Self::new(RequestPayload::MethodCall(MethodCall {
            service: service.into(),
            operation: operation.into(),
            args,
        }))
    }

    pub fn value(value: serde_json::Value) -> Self {
        Self::new(RequestPayload::Value(value))
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn payload(&self) -> &RequestPayload {
        &self.payload
    }

    pub fn into_parts(self) -> (RequestId, RequestPayload) {
        (self.request_id, self.payload)
    }
}

/// The answer to a [`Request`]. `request_id` always equals the id of the request it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    request_id: RequestId,
    outcome: Result<serde_json::Value, RemoteError>,
}

impl Response {
    pub fn success(request_id: RequestId, value: serde_json::Value) -> Self {
        Self { request_id, outcome: Ok(value) }
    }

    pub fn failure(request_id: RequestId, error: RemoteError) -> Self {
        Self { request_id, outcome: Err(error) }
    }

    /// Build the response for `request` from the outcome of handling it.
    pub fn answering(request: &Request, outcome: Result<serde_json::Value, RemoteError>) -> Self {
        Self { request_id: request.request_id.clone(), outcome }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn answers(&self, request_id: &RequestId) -> bool {
        &self.request_id == request_id
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn outcome(&self) -> &Result<serde_json::Value, RemoteError> {
        &self.outcome
    }

    pub fn into_outcome(self) -> Result<serde_json::Value, RemoteError> {
        self.outcome
    }
}

/// Everything that travels over a [`crate::Connection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    Response(Response),
    /// Any other traffic between the peers. Remote calls ignore it.
    Notification(serde_json::Value),
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Request(req) => match req.payload() {
                RequestPayload::MethodCall(call) => {
                    write!(f, "Request({}, {}.{})", req.request_id(), call.service, call.operation)
                }
                RequestPayload::Value(_) => write!(f, "Request({}, value)", req.request_id()),
            },
            Message::Response(res) => {
                let status = if res.is_success() { "ok" } else { "error" };
                write!(f, "Response({}, {status})", res.request_id())
            }
            Message::Notification(_) => write!(f, "Notification"),
        }
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Response> for Message {
    fn from(res: Response) -> Self {
        Message::Response(res)
    }
}
