//! Per-worker holder of the published token ring.

use super::barrier::{Operation, PhasedBarrier, StaleVersions};
use super::lock::{RingLock, RingLockSource};
use super::COORDINATOR_SHARD;
use crate::config::{DistributorConfig, RingConfig};
use crate::error::{Error, Result};
use crate::metrics::RingMetrics;
use crate::ring::{TokenRangeSplitter, TokenRing};
use crate::types::{ShardId, Version};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A published ring as seen by one worker.
///
/// Holds an operation of the worker's barrier phase current at publish time,
/// so the phase stays open for as long as anyone holds the snapshot.
#[derive(Debug)]
pub struct RingSnapshot {
    ring: Arc<TokenRing>,
    shard: ShardId,
    tracker: Operation,
}

impl RingSnapshot {
    /// The shared ring. Every worker publishing the same mutation points
    /// at the same instance.
    pub fn ring(&self) -> &Arc<TokenRing> {
        &self.ring
    }

    /// Worker this snapshot was published on.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Barrier phase the snapshot was published in.
    pub fn phase(&self) -> Option<u64> {
        self.tracker.phase()
    }

    /// A splitter over this snapshot's ring. It holds the ring only, not the
    /// barrier operation, so it does not keep the phase open.
    pub fn splitter(&self) -> TokenRangeSplitter {
        TokenRangeSplitter::new(self.ring.clone())
    }
}

impl Deref for RingSnapshot {
    type Target = TokenRing;

    fn deref(&self) -> &TokenRing {
        &self.ring
    }
}

/// Shared pointer handed to readers.
pub type RingSnapshotPtr = Arc<RingSnapshot>;

/// One worker's view of the token ring.
///
/// Readers call [`get`](Self::get) and never block. Writers go through
/// [`mutate_token_metadata`](Self::mutate_token_metadata) or
/// [`mutate_on_all_shards`](Self::mutate_on_all_shards), which serialize on
/// the ring lock and only ever modify a private clone.
pub struct SharedTokenRing {
    shard: ShardId,
    shared: RwLock<RingSnapshotPtr>,
    lock_source: Arc<dyn RingLockSource>,
    barrier: PhasedBarrier,
    stale_versions: Mutex<StaleVersions>,
    fence_version: AtomicU64,
    metrics: Arc<RingMetrics>,
}

impl SharedTokenRing {
    /// Create a worker holding an empty ring bound to the local node.
    pub fn new(shard: ShardId, config: RingConfig, lock_source: Arc<dyn RingLockSource>) -> Self {
        Self::with_ring(shard, Arc::new(TokenRing::new(config)), lock_source)
    }

    /// Create a worker publishing `ring` as its initial snapshot.
    pub fn with_ring(
        shard: ShardId,
        ring: Arc<TokenRing>,
        lock_source: Arc<dyn RingLockSource>,
    ) -> Self {
        let barrier = PhasedBarrier::new();
        let metrics = Arc::new(RingMetrics::new());
        metrics.version.set(ring.get_version());
        metrics.token_count.set(ring.sorted_tokens().len() as u64);
        let snapshot = Arc::new(RingSnapshot {
            ring,
            shard,
            tracker: barrier.start(),
        });

        Self {
            shard,
            shared: RwLock::new(snapshot),
            lock_source,
            barrier,
            stale_versions: Mutex::new(StaleVersions::ready()),
            fence_version: AtomicU64::new(0),
            metrics,
        }
    }

    /// Create one worker per shard, all starting from the same empty ring.
    /// Worker 0 is the coordinator.
    pub fn new_sharded(
        config: &DistributorConfig,
        lock_source: Arc<dyn RingLockSource>,
    ) -> Vec<Arc<SharedTokenRing>> {
        let ring = Arc::new(TokenRing::new(config.ring.clone()));
        (0..config.num_shards)
            .map(|shard| {
                Arc::new(Self::with_ring(
                    shard,
                    ring.clone(),
                    lock_source.clone(),
                ))
            })
            .collect()
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    pub fn metrics(&self) -> &Arc<RingMetrics> {
        &self.metrics
    }

    /// Current barrier phase of this worker.
    pub fn phase(&self) -> u64 {
        self.barrier.phase()
    }

    /// The current snapshot. Stays valid after later publishes.
    pub fn get(&self) -> RingSnapshotPtr {
        self.shared.read().clone()
    }

    /// Publish `ring` as this worker's current snapshot.
    ///
    /// A higher version opens a new barrier phase and replaces the cached
    /// stale-versions future. An equal version joins the current phase and
    /// must carry the same content as the published ring.
    /// Calls are expected to be serialized by the ring lock.
    pub fn set(&self, ring: Arc<TokenRing>) -> Result<()> {
        let mut shared = self.shared.write();
        let current = shared.ring.get_version();
        let requested = ring.get_version();

        if requested < current {
            self.metrics.publishes_rejected.inc();
            tracing::warn!(
                shard = self.shard,
                current,
                requested,
                "Rejected token ring with a lower version"
            );
            return Err(Error::StaleVersion { current, requested });
        }
        if ring.get_ring_version() <= shared.ring.get_ring_version() {
            self.metrics.publishes_rejected.inc();
            return Err(Error::Internal(format!(
                "token ring (ring version {}) was already published on shard {}",
                ring.get_ring_version(),
                self.shard
            )));
        }
        if requested == current && !same_content(&ring, &shared.ring) {
            self.metrics.publishes_rejected.inc();
            tracing::warn!(
                shard = self.shard,
                version = requested,
                "Rejected token ring that differs from the published ring of the same version"
            );
            return Err(Error::Internal(format!(
                "a different token ring with version {} is already published on shard {}",
                requested, self.shard
            )));
        }

        if requested > current {
            *self.stale_versions.lock() = self.barrier.advance_and_await();
            self.metrics.phase_advances.inc();
            tracing::info!(
                shard = self.shard,
                from = current,
                to = requested,
                phase = self.barrier.phase(),
                "Token ring version advanced"
            );
        }

        let tokens = ring.sorted_tokens().len();
        let snapshot = Arc::new(RingSnapshot {
            ring,
            shard: self.shard,
            tracker: self.barrier.start(),
        });
        let previous = std::mem::replace(&mut *shared, snapshot);
        drop(shared);

        self.metrics
            .record_publish(requested, tokens, self.barrier.phase());
        tracing::debug!(
            shard = self.shard,
            version = requested,
            tokens,
            "Published token ring"
        );

        // the old ring may be large; release it outside the lock
        drop(previous);
        Ok(())
    }

    /// Resolves once no snapshot older than the current version is held
    /// anywhere on this worker. Has no timeout of its own.
    pub fn stale_versions_in_use(&self) -> impl Future<Output = ()> + Send + 'static {
        self.stale_versions.lock().clone().wait()
    }

    /// Whether snapshots of an older version are still held.
    pub fn has_stale_versions_in_use(&self) -> bool {
        !self.stale_versions.lock().is_ready()
    }

    /// Move the fence forward. Lowering it is refused.
    pub fn update_fence_version(&self, version: Version) -> Result<()> {
        self.fence_version
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (version >= current).then_some(version)
            })
            .map_err(|current| {
                tracing::warn!(
                    shard = self.shard,
                    current,
                    requested = version,
                    "Rejected fence version update"
                );
                Error::StaleVersion {
                    current,
                    requested: version,
                }
            })?;
        self.metrics.fence_version.set_max(version);
        tracing::debug!(shard = self.shard, version, "Updated fence version");
        Ok(())
    }

    pub fn get_fence_version(&self) -> Version {
        self.fence_version.load(Ordering::Acquire)
    }

    fn raise_fence_version(&self, version: Version) {
        self.fence_version.fetch_max(version, Ordering::AcqRel);
        self.metrics.fence_version.set_max(version);
    }

    /// Acquire the mutation permit. Only the coordinator may call this.
    pub async fn get_lock(&self) -> Result<RingLock> {
        if self.shard != COORDINATOR_SHARD {
            return Err(Error::Internal(format!(
                "token ring lock requested on shard {}, only shard {} may mutate",
                self.shard, COORDINATOR_SHARD
            )));
        }
        self.lock_source.acquire().await
    }

    /// Clone the current ring, run `mutator` on the clone and publish the
    /// result on this worker.
    ///
    /// On failure the clone is dropped and the published snapshot is left
    /// exactly as it was.
    pub async fn mutate_token_metadata<F, Fut>(&self, mutator: F) -> Result<()>
    where
        F: FnOnce(TokenRing) -> Fut,
        Fut: Future<Output = Result<TokenRing>>,
    {
        let _lock = self.get_lock().await?;
        let result = match self.clone_and_mutate(mutator).await {
            Ok(ring) => self.set(ring),
            Err(e) => Err(e),
        };
        self.finish_mutation(&result);
        result
    }

    /// Run `mutator` once on the coordinator (`workers[0]`) and publish the
    /// resulting ring on every worker, in order.
    ///
    /// Each worker's fence is raised to the new version after its publish.
    /// The first worker that refuses the ring stops propagation and is
    /// reported as [`Error::Propagation`]; workers before it already hold
    /// the new ring, workers after it do not.
    pub async fn mutate_on_all_shards<F, Fut>(
        workers: &[Arc<SharedTokenRing>],
        mutator: F,
    ) -> Result<()>
    where
        F: FnOnce(TokenRing) -> Fut,
        Fut: Future<Output = Result<TokenRing>>,
    {
        let (coordinator, others) = workers
            .split_first()
            .ok_or_else(|| Error::InvalidArgument("no workers to mutate".to_string()))?;

        let _lock = coordinator.get_lock().await?;
        let result = match coordinator.clone_and_mutate(mutator).await {
            Ok(ring) => Self::propagate(coordinator, others, ring),
            Err(e) => Err(e),
        };
        coordinator.finish_mutation(&result);
        result
    }

    fn propagate(
        coordinator: &SharedTokenRing,
        others: &[Arc<SharedTokenRing>],
        ring: Arc<TokenRing>,
    ) -> Result<()> {
        let version = ring.get_version();
        coordinator.set(ring.clone())?;
        coordinator.raise_fence_version(version);

        for worker in others {
            worker
                .set(ring.clone())
                .map_err(|e| Error::Propagation {
                    shard: worker.shard,
                    source: Box::new(e),
                })?;
            worker.raise_fence_version(version);
        }

        tracing::info!(
            version,
            workers = others.len() + 1,
            "Token ring propagated to all shards"
        );
        Ok(())
    }

    async fn clone_and_mutate<F, Fut>(&self, mutator: F) -> Result<Arc<TokenRing>>
    where
        F: FnOnce(TokenRing) -> Fut,
        Fut: Future<Output = Result<TokenRing>>,
    {
        let clone = {
            let base = self.get();
            base.clone_async().await
        };
        let ring = mutator(clone).await?;
        Ok(Arc::new(ring))
    }

    fn finish_mutation(&self, result: &Result<()>) {
        self.metrics.record_mutation(result.is_ok());
        if let Err(e) = result {
            tracing::warn!(
                shard = self.shard,
                error = %e,
                "Token ring mutation failed, published ring unchanged"
            );
        }
    }
}

/// Value equality including the topology change overlay.
fn same_content(a: &TokenRing, b: &TokenRing) -> bool {
    a == b && a.get_topology_change_info() == b.get_topology_change_info()
}

impl fmt::Debug for SharedTokenRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.get();
        f.debug_struct("SharedTokenRing")
            .field("shard", &self.shard)
            .field("version", &current.get_version())
            .field("fence_version", &self.get_fence_version())
            .field("phase", &self.barrier.phase())
            .field("lock_source", &self.lock_source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributor::LocalRingLock;
    use crate::ring::RingPosition;
    use crate::types::{DcRack, Endpoint, NodeState, Token};
    use std::time::Duration;
    use tokio::time::timeout;

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    fn worker(shard: ShardId) -> SharedTokenRing {
        SharedTokenRing::new(
            shard,
            RingConfig::new(ep("10.0.0.1")),
            Arc::new(LocalRingLock::new()),
        )
    }

    async fn next_version(stm: &SharedTokenRing) -> TokenRing {
        let mut ring = stm.get().clone_async().await;
        ring.set_version(ring.get_version() + 1);
        ring
    }

    #[tokio::test]
    async fn test_get_survives_set() {
        let stm = worker(0);
        let before = stm.get();
        let expected = before.clone_async().await;

        let mut ring = next_version(&stm).await;
        ring.update_topology(ep("10.0.0.2"), DcRack::default(), Some(NodeState::Normal), None);
        ring.update_normal_tokens([Token(10)], ep("10.0.0.2"))
            .await
            .unwrap();
        stm.set(Arc::new(ring)).unwrap();

        assert_eq!(before.get_version(), 0);
        assert!(before.sorted_tokens().is_empty());
        assert_eq!(before.ring().as_ref(), &expected);
        assert_eq!(stm.get().get_version(), 1);
        assert_eq!(stm.get().get_endpoint(Token(10)), Some(ep("10.0.0.2")));
    }

    #[tokio::test]
    async fn test_set_rejects_lower_version() {
        let stm = worker(0);
        stm.set(Arc::new(next_version(&stm).await)).unwrap();
        let mut lower = stm.get().clone_async().await;
        lower.set_version(0);
        let err = stm.set(Arc::new(lower)).unwrap_err();
        assert!(matches!(
            err,
            Error::StaleVersion {
                current: 1,
                requested: 0
            }
        ));
        assert_eq!(stm.get().get_version(), 1);
        assert_eq!(stm.metrics().snapshot().publishes_rejected, 1);
    }

    #[tokio::test]
    async fn test_set_rejects_republishing_same_ring() {
        let stm = worker(0);
        let ring = Arc::new(next_version(&stm).await);
        stm.set(ring.clone()).unwrap();
        assert!(matches!(stm.set(ring), Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_set_rejects_different_ring_at_same_version() {
        let stm = worker(0);
        let mut ring = next_version(&stm).await;
        ring.update_topology(ep("10.0.0.2"), DcRack::default(), Some(NodeState::Normal), None);
        ring.update_normal_tokens([Token(10)], ep("10.0.0.2"))
            .await
            .unwrap();
        stm.set(Arc::new(ring)).unwrap();
        assert!(!stm.has_stale_versions_in_use());

        let reader = stm.get();
        let expected = reader.clone_async().await;

        let mut divergent = reader.clone_async().await;
        divergent
            .update_normal_tokens([Token(99)], ep("10.0.0.2"))
            .await
            .unwrap();
        assert_eq!(divergent.get_version(), 1);
        let err = stm.set(Arc::new(divergent)).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        let current = stm.get();
        assert!(Arc::ptr_eq(current.ring(), reader.ring()));
        assert_eq!(current.ring().as_ref(), &expected);
        assert_eq!(current.get_endpoint(Token(99)), None);
        assert_eq!(stm.phase(), 1);
        assert!(!stm.has_stale_versions_in_use());
        assert_eq!(stm.metrics().snapshot().publishes_rejected, 1);

        drop(reader);
    }

    #[tokio::test]
    async fn test_set_rejects_different_overlay_at_same_version() {
        let stm = worker(0);
        let mut ring = next_version(&stm).await;
        ring.update_topology(ep("10.0.0.2"), DcRack::default(), Some(NodeState::Normal), None);
        ring.update_normal_tokens([Token(10)], ep("10.0.0.2"))
            .await
            .unwrap();
        ring.add_leaving_endpoint(ep("10.0.0.2"));
        stm.set(Arc::new(ring)).unwrap();
        assert!(stm.get().get_topology_change_info().is_none());

        let mut with_overlay = stm.get().clone_async().await;
        let resolver = |_: Endpoint| -> Option<DcRack> { None };
        with_overlay
            .update_topology_change_info(&resolver)
            .await
            .unwrap();
        assert!(with_overlay.get_topology_change_info().is_some());
        assert_eq!(&with_overlay, stm.get().ring().as_ref());

        assert!(matches!(
            stm.set(Arc::new(with_overlay)),
            Err(Error::Internal(_))
        ));
        assert!(stm.get().get_topology_change_info().is_none());
    }

    #[tokio::test]
    async fn test_splitter_outlives_snapshot() {
        let stm = worker(0);
        let mut ring = next_version(&stm).await;
        ring.update_topology(ep("10.0.0.2"), DcRack::default(), Some(NodeState::Normal), None);
        ring.update_normal_tokens([Token(10), Token(20)], ep("10.0.0.2"))
            .await
            .unwrap();
        stm.set(Arc::new(ring)).unwrap();

        let mut splitter = stm.get().splitter();
        stm.set(Arc::new(next_version(&stm).await)).unwrap();
        assert!(!stm.has_stale_versions_in_use());

        splitter.reset(RingPosition::after(Token(10)));
        assert_eq!(splitter.ring().get_version(), 1);
        assert_eq!(splitter.collect::<Vec<_>>(), vec![Token(20), Token(10)]);
    }

    #[tokio::test]
    async fn test_initial_snapshot_is_not_a_publish() {
        let stm = worker(0);
        let snap = stm.metrics().snapshot();
        assert_eq!(snap.publishes, 0);
        assert_eq!(snap.publishes_rejected, 0);
        assert_eq!(snap.version, 0);

        stm.set(Arc::new(next_version(&stm).await)).unwrap();
        let mut lower = stm.get().clone_async().await;
        lower.set_version(0);
        assert!(stm.set(Arc::new(lower)).is_err());
        assert!(stm.set(stm.get().ring().clone()).is_err());

        let snap = stm.metrics().snapshot();
        assert_eq!(snap.publishes, 1);
        assert_eq!(snap.publishes_rejected, 2);
        assert_eq!(snap.version, 1);
    }

    #[tokio::test]
    async fn test_equal_version_keeps_phase() {
        let stm = worker(0);
        let ring = stm.get().clone_async().await;
        stm.set(Arc::new(ring)).unwrap();
        assert_eq!(stm.phase(), 0);
        assert!(!stm.has_stale_versions_in_use());

        stm.set(Arc::new(next_version(&stm).await)).unwrap();
        assert_eq!(stm.phase(), 1);
        assert_eq!(stm.get().phase(), Some(1));
    }

    #[tokio::test]
    async fn test_stale_versions_wait_for_readers() {
        let stm = worker(0);
        let reader = stm.get();

        stm.set(Arc::new(next_version(&stm).await)).unwrap();
        assert!(stm.has_stale_versions_in_use());
        let stale = stm.stale_versions_in_use();
        let waiter = tokio::spawn(stale);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(reader);
        timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!stm.has_stale_versions_in_use());
    }

    #[test]
    fn test_fence_version() {
        let stm = worker(0);
        assert_eq!(stm.get_fence_version(), 0);
        stm.update_fence_version(5).unwrap();
        stm.update_fence_version(5).unwrap();
        assert!(matches!(
            stm.update_fence_version(4),
            Err(Error::StaleVersion {
                current: 5,
                requested: 4
            })
        ));
        assert_eq!(stm.get_fence_version(), 5);
        assert_eq!(stm.metrics().snapshot().fence_version, 5);
    }

    #[tokio::test]
    async fn test_lock_only_on_coordinator() {
        assert!(worker(0).get_lock().await.is_ok());
        assert!(matches!(worker(1).get_lock().await, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_mutate_token_metadata() {
        let stm = worker(0);
        stm.mutate_token_metadata(|mut ring| async move {
            ring.update_topology(ep("10.0.0.1"), DcRack::default(), None, None);
            ring.update_normal_tokens([Token(5), Token(15)], ep("10.0.0.1"))
                .await?;
            ring.set_version(3);
            Ok(ring)
        })
        .await
        .unwrap();

        let current = stm.get();
        assert_eq!(current.get_version(), 3);
        assert_eq!(current.sorted_tokens(), &[Token(5), Token(15)]);

        let snap = stm.metrics().snapshot();
        assert_eq!(snap.mutations, 1);
        assert_eq!(snap.mutations_failed, 0);
        assert_eq!(snap.token_count, 2);
    }

    #[tokio::test]
    async fn test_mutations_are_serialized() {
        let stm = Arc::new(worker(0));
        let held = stm.get_lock().await.unwrap();

        let pending = {
            let stm = stm.clone();
            tokio::spawn(async move {
                stm.mutate_token_metadata(|mut ring| async move {
                    ring.set_version(1);
                    Ok(ring)
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(stm.get().get_version(), 0);

        drop(held);
        timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stm.get().get_version(), 1);
    }

    #[tokio::test]
    async fn test_new_sharded_shares_initial_ring() {
        let config = DistributorConfig::new(3);
        let workers = SharedTokenRing::new_sharded(&config, Arc::new(LocalRingLock::new()));
        assert_eq!(workers.len(), 3);
        assert!(Arc::ptr_eq(workers[0].get().ring(), workers[2].get().ring()));
        assert_eq!(workers[2].shard(), 2);
        assert_eq!(workers[2].get().shard(), 2);
    }

    #[tokio::test]
    async fn test_mutate_on_no_workers() {
        let err = SharedTokenRing::mutate_on_all_shards(&[], |ring| async move { Ok(ring) })
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
