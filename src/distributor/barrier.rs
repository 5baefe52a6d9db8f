//! Phased barrier: an epoch counter with per-epoch in-flight operations.
//!
//! Work registers with [`PhasedBarrier::start`] and holds the returned
//! [`Operation`] for as long as it runs. [`PhasedBarrier::advance_and_await`]
//! opens a new phase and hands back a [`StaleVersions`] future that resolves
//! once every operation of every earlier phase has been dropped.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// One phase. Dropped once the barrier has moved past it and its last
/// operation has finished, which closes the channel its waiters watch.
#[derive(Debug)]
struct PhaseGate {
    phase: u64,
    _closed: watch::Sender<()>,
}

impl PhaseGate {
    fn new(phase: u64) -> Self {
        let (tx, _) = watch::channel(());
        Self { phase, _closed: tx }
    }
}

#[derive(Debug)]
struct BarrierState {
    phase: u64,
    gate: Arc<PhaseGate>,
    /// Earlier phases that may still have operations in flight.
    retired: Vec<watch::Receiver<()>>,
}

/// Quiescence detector for generation changes.
#[derive(Debug)]
pub struct PhasedBarrier {
    state: Mutex<BarrierState>,
}

impl PhasedBarrier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState {
                phase: 0,
                gate: Arc::new(PhaseGate::new(0)),
                retired: Vec::new(),
            }),
        }
    }

    /// Register an operation in the current phase.
    pub fn start(&self) -> Operation {
        let state = self.state.lock();
        Operation {
            gate: Some(state.gate.clone()),
        }
    }

    /// Current phase number.
    pub fn phase(&self) -> u64 {
        self.state.lock().phase
    }

    /// Number of operations registered in the current phase and still running.
    pub fn operations_in_progress(&self) -> usize {
        Arc::strong_count(&self.state.lock().gate) - 1
    }

    /// Open a new phase and return a future for the retirement of every
    /// earlier one.
    pub fn advance_and_await(&self) -> StaleVersions {
        let mut state = self.state.lock();
        state.phase += 1;
        let next = Arc::new(PhaseGate::new(state.phase));
        let previous = std::mem::replace(&mut state.gate, next);

        let rx = previous._closed.subscribe();
        drop(previous);

        // has_changed() errors once the sender is gone, i.e. the phase is done
        state.retired.retain(|rx| rx.has_changed().is_ok());
        if rx.has_changed().is_ok() {
            state.retired.push(rx);
        }

        tracing::trace!(
            phase = state.phase,
            pending_phases = state.retired.len(),
            "Advanced phased barrier"
        );
        StaleVersions {
            pending: state.retired.clone(),
        }
    }
}

impl Default for PhasedBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-flight unit of work holding its phase open.
#[derive(Debug)]
pub struct Operation {
    gate: Option<Arc<PhaseGate>>,
}

impl Operation {
    /// An operation not tied to any barrier.
    pub fn detached() -> Self {
        Self { gate: None }
    }

    /// Phase this operation belongs to.
    pub fn phase(&self) -> Option<u64> {
        self.gate.as_ref().map(|g| g.phase)
    }
}

/// Resolves once every operation of the phases it was created for is done.
///
/// Clones wait on the same phases. There is no timeout; race it against
/// `tokio::time::timeout` when a bound is needed.
#[derive(Debug, Clone, Default)]
pub struct StaleVersions {
    pending: Vec<watch::Receiver<()>>,
}

impl StaleVersions {
    /// An already-resolved instance.
    pub fn ready() -> Self {
        Self::default()
    }

    /// Check without waiting.
    pub fn is_ready(&self) -> bool {
        self.pending.iter().all(|rx| rx.has_changed().is_err())
    }

    /// Wait until every tracked phase is retired.
    pub async fn wait(mut self) {
        for rx in &mut self.pending {
            // nothing is ever sent; changed() returns Err once the gate drops
            while rx.changed().await.is_ok() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_advance_without_operations_is_ready() {
        let barrier = PhasedBarrier::new();
        let stale = barrier.advance_and_await();
        assert!(stale.is_ready());
        stale.wait().await;
        assert_eq!(barrier.phase(), 1);
    }

    #[tokio::test]
    async fn test_waits_for_old_operations() {
        let barrier = PhasedBarrier::new();
        let op = barrier.start();
        assert_eq!(op.phase(), Some(0));
        assert_eq!(barrier.operations_in_progress(), 1);

        let stale = barrier.advance_and_await();
        assert!(!stale.is_ready());
        assert_eq!(barrier.operations_in_progress(), 0);

        // new-phase operations do not block
        let _new_op = barrier.start();
        assert!(timeout(Duration::from_millis(20), stale.clone().wait())
            .await
            .is_err());

        drop(op);
        assert!(stale.is_ready());
        timeout(Duration::from_secs(1), stale.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_waits_for_all_earlier_phases() {
        let barrier = PhasedBarrier::new();
        let op0 = barrier.start();
        let _ = barrier.advance_and_await();
        let op1 = barrier.start();
        let stale = barrier.advance_and_await();

        drop(op1);
        assert!(!stale.is_ready(), "phase 0 still has an operation");
        drop(op0);
        timeout(Duration::from_secs(1), stale.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_drop() {
        let barrier = Arc::new(PhasedBarrier::new());
        let op = barrier.start();
        let stale = barrier.advance_and_await();

        let waiter = tokio::spawn(stale.wait());
        tokio::task::yield_now().await;
        drop(op);
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[test]
    fn test_detached_operation() {
        assert_eq!(Operation::detached().phase(), None);
        assert!(StaleVersions::ready().is_ready());
    }
}
