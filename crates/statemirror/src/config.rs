//! Context configuration.

use std::time::Duration;

use statemirror_core::DEFAULT_NAMESPACE;
use statemirror_sync::EndpointConfig;

/// Configuration for a [`StoreContext`](crate::StoreContext).
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Prefix of every store channel. Processes must agree on it.
    pub namespace: String,
    /// How long a dependent waits for the authority's snapshot.
    pub snapshot_timeout: Duration,
    /// Transport endpoint settings.
    pub endpoint: EndpointConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            snapshot_timeout: Duration::from_secs(30),
            endpoint: EndpointConfig::default(),
        }
    }
}

impl ContextConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ContextConfig::default();
        assert_eq!(config.namespace, "$Stores$");
        assert_eq!(config.snapshot_timeout, Duration::from_secs(30));
        assert_eq!(config.endpoint.max_payload_bytes, 1024 * 1024);
    }

    #[test]
    fn test_builders() {
        let config = ContextConfig::default()
            .with_namespace("game")
            .with_snapshot_timeout(Duration::from_millis(250))
            .with_endpoint(EndpointConfig::default().with_max_payload_bytes(64));
        assert_eq!(config.namespace, "game");
        assert_eq!(config.snapshot_timeout, Duration::from_millis(250));
        assert_eq!(config.endpoint.max_payload_bytes, 64);
    }
}
