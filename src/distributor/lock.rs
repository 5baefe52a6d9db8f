//! The single permit serializing token ring mutations.

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A held mutation permit. Released on drop.
pub struct RingLock {
    _permit: Box<dyn Send + Sync>,
}

impl RingLock {
    /// Wrap any releasable permit (a mutex guard, semaphore units, ...).
    pub fn new<P>(permit: P) -> Self
    where
        P: Send + Sync + 'static,
    {
        Self {
            _permit: Box::new(permit),
        }
    }
}

impl fmt::Debug for RingLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingLock").finish_non_exhaustive()
    }
}

/// Produces the mutation permit.
///
/// Supplied at construction so the permit can be shared with other
/// subsystems that must not interleave with ring mutations.
#[async_trait]
pub trait RingLockSource: Send + Sync + fmt::Debug {
    async fn acquire(&self) -> Result<RingLock>;
}

/// In-process lock source backed by a tokio mutex.
#[derive(Debug, Clone, Default)]
pub struct LocalRingLock {
    mutex: Arc<Mutex<()>>,
}

impl LocalRingLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the permit is currently held.
    pub fn is_locked(&self) -> bool {
        self.mutex.try_lock().is_err()
    }
}

#[async_trait]
impl RingLockSource for LocalRingLock {
    async fn acquire(&self) -> Result<RingLock> {
        let guard = self.mutex.clone().lock_owned().await;
        Ok(RingLock::new(guard))
    }
}
