use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The longest a remote call waits for its response, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Tunables for remote calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Wait ceiling for one exchange, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self { request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS }
    }
}

impl RpcConfig {
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout = secs;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_to_one_minute() {
        let config = RpcConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        let config: RpcConfig = serde_json::from_str("{}").expect("empty config");
        assert_eq!(config, RpcConfig::default());
        assert_eq!(config.with_request_timeout(5).request_timeout(), Duration::from_secs(5));
    }
}
