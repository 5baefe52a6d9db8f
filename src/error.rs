//! Error types for the token ring and its snapshot distributor.

use crate::types::{ShardId, Version};
use thiserror::Error;

/// Result type alias for token ring operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the token ring.
#[derive(Error, Debug)]
pub enum Error {
    /// The caller passed an argument the ring cannot accept.
    ///
    /// Also returned for malformed host id / endpoint strings.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A well-formed host id or endpoint is not part of the ring.
    #[error("not found: {0}")]
    NotFound(String),

    /// Attempt to move a version or fence backwards.
    #[error("stale version: current {current}, requested {requested}")]
    StaleVersion { current: Version, requested: Version },

    /// Publishing a mutated ring to another worker failed.
    #[error("propagation to shard {shard} failed: {source}")]
    Propagation {
        shard: ShardId,
        #[source]
        source: Box<Error>,
    },

    /// A caller-supplied mutation failed.
    #[error("mutation failed: {0}")]
    Mutation(String),

    /// The mutation lock could not be acquired.
    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this is an invalid-argument class failure.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    /// Whether this is a not-found class failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
