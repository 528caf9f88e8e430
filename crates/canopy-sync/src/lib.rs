//! Canopy Sync - repository broadcast engine and client sessions
//!
//! This crate connects forest replicas through the delta protocol.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use canopy_sync::prelude::*;
//! use canopy_core::LanguageRegistry;
//! use std::sync::Arc;
//!
//! # async fn run() -> canopy_sync::Result<()> {
//! let registry = Arc::new(LanguageRegistry::new());
//! let (connector, listener) = memory_listener();
//! let repository = RepositoryConnector::new(RepositoryConfig::default(), registry.clone());
//! let server: RepositoryServer = RepositoryServer::spawn(repository, listener);
//!
//! let config = ClientConfigBuilder::new().client_id("alice").build();
//! let client: Client = Client::new(config, registry);
//! client.connect(connector.connect()?);
//! client.sign_on().await?;
//! let partitions = client.list_partitions().await?;
//! # drop(partitions);
//! # server.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`repository`] - The single writer of the canonical forest; turns
//!   confirmed commands into per-participation events
//! - [`broadcast`] - Which participation sees which change
//! - [`participation`] - Per-client subscriptions and event counters
//! - [`server`] - Async loop serving a repository over transports
//! - [`connector`] - Client replica: local edits, pending commands, rebasing
//! - [`session`] - Client session state machine
//! - [`client`] - Async client with query timeouts
//! - [`network`] - Transport abstraction and in-memory transport
//! - [`codec`] - Message framing
//! - [`config`] - Repository and client configuration
//! - [`error`] - Error types

pub mod broadcast;
pub mod client;
pub mod codec;
pub mod config;
pub mod connector;
pub mod error;
pub mod network;
pub mod participation;
pub mod repository;
pub mod server;
pub mod session;

// Re-exports for convenience
pub use client::{Client, ClientEvent, Progress};
pub use config::{ClientConfig, ClientConfigBuilder, RepositoryConfig, RepositoryConfigBuilder};
pub use connector::{ClientConnector, Received};
pub use error::{Result, SyncError};
pub use network::{
    memory_listener, memory_pair, Listener, MemoryConnector, MemoryListener, MemoryTransport,
    NetworkError, Transport,
};
pub use participation::{ConnectionId, Participation};
pub use repository::{Outgoing, RepositoryConnector};
pub use server::RepositoryServer;
pub use session::{Session, SessionState};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{Client, ClientEvent};
    pub use crate::config::{ClientConfigBuilder, RepositoryConfig, RepositoryConfigBuilder};
    pub use crate::error::SyncError;
    pub use crate::network::{memory_listener, Transport};
    pub use crate::repository::RepositoryConnector;
    pub use crate::server::RepositoryServer;
    pub use crate::session::SessionState;
}
