//! Versioned distribution of token ring snapshots to execution workers.
//!
//! # Architecture
//!
//! ```text
//!            coordinator (shard 0)
//!   ┌───────────────────────────────────────┐
//!   │ get_lock ─▶ clone_async ─▶ mutator    │
//!   └──────────────────┬────────────────────┘
//!                      │ Arc<TokenRing>
//!        ┌─────────────┼──────────────┐
//!        ▼             ▼              ▼
//!   ┌─────────┐   ┌─────────┐    ┌─────────┐
//!   │ shard 0 │   │ shard 1 │ .. │ shard N │   SharedTokenRing
//!   │ barrier │   │ barrier │    │ barrier │   set() + fence
//!   └────┬────┘   └────┬────┘    └────┬────┘
//!        ▼             ▼              ▼
//!     readers: get() -> Arc<RingSnapshot>, never blocking
//! ```
//!
//! Every snapshot holds an operation of its worker's barrier phase. A publish
//! with a higher version opens a new phase; the worker's stale-versions future
//! resolves once every snapshot of the earlier phases has been dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! let workers = SharedTokenRing::new_sharded(&config, Arc::new(LocalRingLock::new()));
//!
//! SharedTokenRing::mutate_on_all_shards(&workers, |mut ring| async move {
//!     ring.update_normal_tokens(tokens, endpoint).await?;
//!     ring.set_version(ring.get_version() + 1);
//!     Ok(ring)
//! })
//! .await?;
//!
//! for worker in &workers {
//!     worker.stale_versions_in_use().await;
//! }
//! ```

mod barrier;
mod lock;
mod shared;

pub use barrier::{Operation, PhasedBarrier, StaleVersions};
pub use lock::{LocalRingLock, RingLock, RingLockSource};
pub use shared::{RingSnapshot, RingSnapshotPtr, SharedTokenRing};

use crate::types::ShardId;

/// The worker allowed to take the ring lock and drive mutations.
pub const COORDINATOR_SHARD: ShardId = 0;
