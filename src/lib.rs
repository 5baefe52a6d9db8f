//! Versioned token ring metadata for a consistent-hashing cluster.
//!
//! This crate provides the token ring every placement, replication and
//! routing decision depends on, together with the machinery that publishes
//! new ring versions to every execution worker:
//! - **Token ring**: token ownership, host ids, node lifecycle and topology
//! - **Topology change overlay**: current vs. target ownership while nodes
//!   bootstrap, leave or get replaced
//! - **Snapshot distributor**: lock-serialized clone-mutate-publish with a
//!   phased barrier for retiring stale versions
//!
//! # Example
//!
//! ```rust,no_run
//! use ringmeta::{
//!     DcRack, DistributorConfig, Endpoint, LocalRingLock, NodeState, SharedTokenRing, Token,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DistributorConfig::new(4);
//!     let workers = SharedTokenRing::new_sharded(&config, Arc::new(LocalRingLock::new()));
//!
//!     // Mutations run on a private clone and are published on every worker
//!     let node: Endpoint = "10.0.0.2".parse()?;
//!     SharedTokenRing::mutate_on_all_shards(&workers, |mut ring| async move {
//!         ring.update_topology(node, DcRack::new("dc1", "r1"), Some(NodeState::Normal), None);
//!         ring.update_normal_tokens([Token(-100), Token(100)], node).await?;
//!         ring.set_version(ring.get_version() + 1);
//!         Ok(ring)
//!     })
//!     .await?;
//!
//!     // Reads never block
//!     let snapshot = workers[1].get();
//!     let owners: Vec<Token> = snapshot.ring_range(Token(0)).collect();
//!     println!("walk from 0: {:?}", owners);
//!
//!     // Wait until no worker holds the previous version
//!     for worker in &workers {
//!         worker.stale_versions_in_use().await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │   Placement / Replication / Routing         │
//! └─────────────────────────────────────────────┘
//!                     │ get()
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │     SharedTokenRing (one per worker)        │
//! │  • get() -> Arc<RingSnapshot>               │
//! │  • set / fence / stale_versions_in_use      │
//! │  • mutate_token_metadata / _on_all_shards   │
//! └─────────────────────────────────────────────┘
//!                     │
//!     ┌───────────────┼───────────────┐
//!     ▼               ▼               ▼
//! ┌─────────┐   ┌───────────┐   ┌──────────────┐
//! │TokenRing│   │  Phased   │   │ Topology     │
//! │         │   │  Barrier  │   │ Change Info  │
//! └─────────┘   └───────────┘   └──────────────┘
//! ```
//!
//! # Consistency Model
//!
//! - **Writes**: serialized by one lock on the coordinating worker; each
//!   mutation works on a private clone and is published only on success
//! - **Reads**: lock-free snapshots; a snapshot stays valid after newer
//!   versions are published
//! - **Retirement**: `stale_versions_in_use` resolves once no snapshot of an
//!   older version is held on the worker

pub mod config;
pub mod distributor;
pub mod error;
pub mod metrics;
pub mod ring;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use config::{DistributorConfig, RingConfig, DEFAULT_YIELD_QUANTUM};
pub use error::{Error, Result};
pub use types::{DcRack, Endpoint, HostId, NodeState, ShardId, Token, Version};

// Re-export ring types
pub use ring::{
    DcRackResolver, HostIdOrEndpoint, NodeInfo, ParamType, PositionBound, RingIter, RingPosition,
    TokenOwnershipChange, TokenRange, TokenRangeSplitter, TokenRing, Topology, TopologyChangeInfo,
    UnwrappedTail,
};

// Re-export distributor types
pub use distributor::{
    LocalRingLock, Operation, PhasedBarrier, RingLock, RingLockSource, RingSnapshot,
    RingSnapshotPtr, SharedTokenRing, StaleVersions, COORDINATOR_SHARD,
};

// Re-export metrics types
pub use metrics::{Counter, Gauge, RingMetrics, RingMetricsSnapshot};
