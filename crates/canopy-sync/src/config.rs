//! Repository and client configuration.

use canopy_core::SerializationFormat;
use canopy_delta::{ClientId, PROTOCOL_VERSION};
use std::time::Duration;

/// Configuration for a repository.
#[derive(Clone, Debug)]
pub struct RepositoryConfig {
    /// Clients must name this repository on sign-on.
    pub repository_id: String,
    pub protocol_version: String,
    /// Upper bound on ids handed out by one `GetAvailableIds`.
    pub max_available_ids: usize,
    /// Format of chunks sent to clients.
    pub format: SerializationFormat,
    /// Subscribe the creator of a partition to its contents.
    pub subscribe_originator: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            repository_id: "default".to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            max_available_ids: 1000,
            format: SerializationFormat::default(),
            subscribe_originator: true,
        }
    }
}

/// Builder for repository configuration.
pub struct RepositoryConfigBuilder {
    config: RepositoryConfig,
}

impl RepositoryConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RepositoryConfig::default(),
        }
    }

    pub fn repository_id(mut self, id: impl Into<String>) -> Self {
        self.config.repository_id = id.into();
        self
    }

    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.config.protocol_version = version.into();
        self
    }

    pub fn max_available_ids(mut self, max: usize) -> Self {
        self.config.max_available_ids = max;
        self
    }

    pub fn format(mut self, format: SerializationFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn subscribe_originator(mut self, enabled: bool) -> Self {
        self.config.subscribe_originator = enabled;
        self
    }

    pub fn build(self) -> RepositoryConfig {
        self.config
    }
}

impl Default for RepositoryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub client_id: ClientId,
    pub repository_id: String,
    /// How long to wait for a query response (in milliseconds).
    pub query_timeout_ms: u64,
    /// Capacity of the client event feed.
    pub event_capacity: usize,
}

impl ClientConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: ClientId::new("anonymous"),
            repository_id: "default".to_string(),
            query_timeout_ms: 5000,
            event_capacity: 256,
        }
    }
}

/// Builder for client configuration.
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn client_id(mut self, id: impl Into<ClientId>) -> Self {
        self.config.client_id = id.into();
        self
    }

    pub fn repository_id(mut self, id: impl Into<String>) -> Self {
        self.config.repository_id = id.into();
        self
    }

    pub fn query_timeout(mut self, ms: u64) -> Self {
        self.config.query_timeout_ms = ms;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
