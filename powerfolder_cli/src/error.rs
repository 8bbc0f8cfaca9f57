use powerfolder_p2p::{RemoteCallFailure, RemoteError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid configuration file: {0}")]
    InvalidConfig(#[from] serde_yml::Error),
    #[error("Remote call failed. {0}")]
    RemoteCall(#[from] RemoteCallFailure),
    #[error("The peer answered the echo request with an error. {0}")]
    EchoRejected(RemoteError),
    #[error("Echo {index} came back altered. Sent '{sent}', received '{received}'")]
    EchoMismatch { index: usize, sent: String, received: String },
}
