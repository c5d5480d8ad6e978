//! Shared keyspace used for per-section locks.
//!
//! Every backend offers the same atomic primitives: set-if-absent with a
//! TTL, get, and compare-and-delete. Which backend runs is a deployment
//! choice made in configuration.

mod memory;
mod quorum;
mod redis;

pub use self::memory::MemoryCoordinator;
pub use self::quorum::QuorumCoordinator;
pub use self::redis::{parse_node, RedisCoordinator};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CoordinatorError;

#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Atomically sets `key = value` with expiry `ttl` unless `key` exists.
    ///
    /// Returns `true` if this call created the key.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinatorError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CoordinatorError>;

    /// Atomically deletes `key` only while it still holds `expected`.
    ///
    /// Returns `true` if the key was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str)
        -> Result<bool, CoordinatorError>;

    async fn ping(&self) -> Result<(), CoordinatorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CoordinatorBackend {
    /// One Redis instance (first entry of the node list).
    Single,
    /// Majority locking across every listed Redis instance.
    Quorum,
    /// Process-local keyspace; only safe with a single service instance.
    Memory,
}

/// Builds the configured backend, connecting to every node up front.
pub async fn connect(
    backend: CoordinatorBackend,
    nodes: &[String],
    password: Option<&str>,
) -> Result<Arc<dyn Coordinator>, CoordinatorError> {
    match backend {
        CoordinatorBackend::Memory => Ok(Arc::new(MemoryCoordinator::new())),
        CoordinatorBackend::Single => {
            let node = nodes
                .first()
                .ok_or_else(|| CoordinatorError::Unavailable("no redis nodes configured".into()))?;
            Ok(Arc::new(RedisCoordinator::connect(node, password).await?))
        }
        CoordinatorBackend::Quorum => {
            if nodes.is_empty() {
                return Err(CoordinatorError::Unavailable(
                    "no redis nodes configured".into(),
                ));
            }
            let mut members: Vec<Arc<dyn Coordinator>> = Vec::with_capacity(nodes.len());
            for node in nodes {
                members.push(Arc::new(RedisCoordinator::connect(node, password).await?));
            }
            Ok(Arc::new(QuorumCoordinator::new(members)))
        }
    }
}
