//! The token ring: token ownership, node lifecycle and topology.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          TokenRing                           │
//! │  sorted tokens ──▶ token → endpoint ◀── endpoint → tokens    │
//! │  bootstrap tokens   leaving set   replacing map              │
//! │  host id ⇄ endpoint               Topology (dc/rack/state)   │
//! │                                                              │
//! │  Option<Arc<TopologyChangeInfo>>                             │
//! │    target ring (all pending ops applied)                     │
//! │    base ring   (only when replacing with the same address)   │
//! │    all tokens  + read_new flag                               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A ring is only ever mutated while it is private to its owner. Once it is
//! handed to the distributor it is shared behind an `Arc` and no `&mut`
//! access remains.
//!
//! # Example
//!
//! ```rust,ignore
//! use ringmeta::ring::TokenRing;
//! use ringmeta::{RingConfig, Token};
//!
//! let mut ring = TokenRing::new(RingConfig::new(local));
//! ring.update_topology(a, DcRack::new("dc1", "r1"), None, None);
//! ring.update_normal_tokens([Token(10)], a).await?;
//!
//! let walk: Vec<Token> = ring.ring_range(Token(25)).collect();
//! ```

pub mod algorithms;
mod change_info;
mod host_id;
mod splitter;
mod token_ring;
mod topology;

pub use algorithms::{PositionBound, RingIter, RingPosition, TokenRange, UnwrappedTail};
pub use change_info::{DcRackResolver, TokenOwnershipChange, TopologyChangeInfo};
pub use host_id::{HostIdOrEndpoint, ParamType};
pub use splitter::TokenRangeSplitter;
pub use token_ring::TokenRing;
pub use topology::{NodeInfo, Topology};

/// Counts units of work and yields to the scheduler once a quantum is used up.
#[derive(Debug)]
pub(crate) struct YieldBudget {
    quantum: usize,
    used: usize,
}

impl YieldBudget {
    pub(crate) fn new(quantum: usize) -> Self {
        Self {
            quantum: quantum.max(1),
            used: 0,
        }
    }

    /// Account for one unit of work.
    pub(crate) async fn tick(&mut self) {
        self.used += 1;
        if self.used >= self.quantum {
            self.used = 0;
            tokio::task::yield_now().await;
        }
    }
}
