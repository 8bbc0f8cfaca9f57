use crate::error::CliError;
use crate::folder_service::{folder_contract, FolderServiceStub, SharedFolders, FOLDER_SERVICE};
use crate::settings::Settings;
use async_trait::async_trait;
use log::*;
use powerfolder_p2p::{
    MemoryConnection, MemoryPeer, PeerId, RemoteCallFailure, RemoteCallStub, RemoteError, Request, RequestExecutor,
    RequestHandler, RequestPayload, RequestServer, RpcConfig, ServiceProvider,
};
use serde_json::Value;
use std::sync::Arc;

/// Handler for the remote peer: method calls go to its services, plain values are echoed back.
pub struct EchoingProvider {
    services: ServiceProvider,
}

impl EchoingProvider {
    pub fn new(services: ServiceProvider) -> Self {
        Self { services }
    }
}

#[async_trait]
impl RequestHandler for EchoingProvider {
    async fn handle(&self, from: &PeerId, payload: RequestPayload) -> Result<Value, RemoteError> {
        match payload {
            RequestPayload::Value(value) => {
                trace!("Echoing {value} back to {from}");
                Ok(value)
            }
            RequestPayload::MethodCall(call) => self.services.call(call).await,
        }
    }
}

/// Two linked in-process peers. The remote one serves the demo folder service and echoes plain values.
pub struct Session {
    local: MemoryPeer,
    connection: Arc<MemoryConnection>,
    server: RequestServer,
    rpc: RpcConfig,
}

impl Session {
    /// Must be called from within a tokio runtime.
    pub fn start(settings: &Settings) -> Self {
        let local = MemoryPeer::new(settings.local_peer.as_str());
        let remote = MemoryPeer::new(settings.remote_peer.as_str());
        let (connection, inbound) = local.connect(&remote);
        let services = ServiceProvider::new();
        services.register(FOLDER_SERVICE, Arc::new(SharedFolders::demo(settings.remote_peer.as_str())));
        let server = RequestServer::spawn(inbound, Arc::new(EchoingProvider::new(services)));
        info!("Session between {} and {} started", local.id(), remote.id());
        Self { local, connection, server, rpc: settings.rpc.clone() }
    }

    pub fn folder_service(&self) -> FolderServiceStub {
        let stub = RemoteCallStub::new(folder_contract(), self.connection.clone(), self.local.registry())
            .with_config(self.rpc.clone());
        FolderServiceStub::new(stub)
    }

    /// Send `count` echo requests, each payload extending the previous one, and check every reply.
    /// Returns the last payload sent.
    pub async fn echo_chain(&self, count: usize, first: &str) -> Result<String, CliError> {
        let mut payload = first.to_string();
        for index in 0..count {
            if index > 0 {
                payload.push_str(&format!("---X{index} XXX"));
            }
            let mut executor =
                RequestExecutor::from_config(self.connection.clone(), self.local.registry(), &self.rpc);
            let response = executor
                .execute(Request::value(Value::String(payload.clone())))
                .await
                .map_err(RemoteCallFailure::from)?;
            let received = response.into_outcome().map_err(CliError::EchoRejected)?;
            if received.as_str() != Some(payload.as_str()) {
                return Err(CliError::EchoMismatch { index, sent: payload, received: received.to_string() });
            }
            debug!("Echo {index} verified ({} bytes)", payload.len());
        }
        Ok(payload)
    }

    pub async fn close(self) {
        self.connection.disconnect();
        self.server.shutdown().await;
        info!("Session closed");
    }
}
