//! Testing utilities for the token ring and its distributor.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                     TestShards                        │
//! │  workers: Vec<Arc<SharedTokenRing>>  (shard 0 first)  │
//! │  lock:    LocalRingLock                               │
//! │                                                       │
//! │  add_node / decommission  ──▶ mutate_on_all_shards    │
//! │  versions / wait_stale_versions                       │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use ringmeta::testing::{endpoint, TestShards};
//!
//! let shards = TestShards::new(4);
//! shards.add_node(endpoint(1), &[10, 20]).await?;
//! assert!(shards.wait_stale_versions(Duration::from_secs(1)).await);
//! ```

mod scenarios;

use crate::config::{DistributorConfig, RingConfig};
use crate::distributor::{LocalRingLock, RingLock, RingLockSource, SharedTokenRing};
use crate::error::{Error, Result};
use crate::ring::TokenRing;
use crate::types::{DcRack, Endpoint, NodeState, Token, Version};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

/// `10.0.0.<n>`.
pub fn endpoint(n: u8) -> Endpoint {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
}

/// Build a private ring owned by `local` with the given normal owners.
pub async fn build_ring(local: Endpoint, nodes: &[(Endpoint, &[i64])]) -> Result<TokenRing> {
    let mut ring = TokenRing::new(RingConfig::new(local));
    for (node, tokens) in nodes {
        ring.update_topology(*node, DcRack::default(), Some(NodeState::Normal), None);
        ring.update_normal_tokens(tokens.iter().copied().map(Token), *node)
            .await?;
    }
    Ok(ring)
}

/// A set of workers sharing one coordinator and one lock.
#[derive(Debug)]
pub struct TestShards {
    /// Workers in shard order. Index 0 is the coordinator.
    pub workers: Vec<Arc<SharedTokenRing>>,

    /// The lock every worker was constructed with.
    pub lock: LocalRingLock,
}

impl TestShards {
    /// Create `num_shards` workers bound to `10.0.0.1`.
    pub fn new(num_shards: u32) -> Self {
        let lock = LocalRingLock::new();
        let config = DistributorConfig::new(num_shards)
            .with_ring_config(RingConfig::new(endpoint(1)).with_yield_quantum(4));
        let workers = SharedTokenRing::new_sharded(&config, Arc::new(lock.clone()));
        Self { workers, lock }
    }

    pub fn coordinator(&self) -> &Arc<SharedTokenRing> {
        &self.workers[0]
    }

    /// Add `node` as a normal owner of `tokens` on every worker, bumping
    /// the version.
    pub async fn add_node(&self, node: Endpoint, tokens: &[i64]) -> Result<()> {
        let tokens: Vec<Token> = tokens.iter().copied().map(Token).collect();
        SharedTokenRing::mutate_on_all_shards(&self.workers, |mut ring| async move {
            ring.update_topology(node, DcRack::default(), Some(NodeState::Normal), None);
            ring.update_normal_tokens(tokens, node).await?;
            ring.set_version(ring.get_version() + 1);
            Ok(ring)
        })
        .await
    }

    /// Remove `node` from every worker, bumping the version.
    pub async fn decommission(&self, node: Endpoint) -> Result<()> {
        SharedTokenRing::mutate_on_all_shards(&self.workers, |mut ring| async move {
            ring.remove_endpoint(node);
            ring.set_version(ring.get_version() + 1);
            Ok(ring)
        })
        .await
    }

    /// Published version of each worker.
    pub fn versions(&self) -> Vec<Version> {
        self.workers.iter().map(|w| w.get().get_version()).collect()
    }

    /// Fence version of each worker.
    pub fn fence_versions(&self) -> Vec<Version> {
        self.workers.iter().map(|w| w.get_fence_version()).collect()
    }

    /// Wait for the stale-versions future of every worker. Returns false on
    /// timeout.
    pub async fn wait_stale_versions(&self, timeout: Duration) -> bool {
        let waits: Vec<_> = self
            .workers
            .iter()
            .map(|w| w.stale_versions_in_use())
            .collect();
        tokio::time::timeout(timeout, async move {
            for wait in waits {
                wait.await;
            }
        })
        .await
        .is_ok()
    }
}

/// A lock source that always fails, for exercising lock errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableLock;

#[async_trait]
impl RingLockSource for UnavailableLock {
    async fn acquire(&self) -> Result<RingLock> {
        Err(Error::LockUnavailable("lock source is shut down".to_string()))
    }
}
