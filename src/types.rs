//! Core types used throughout the token ring.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

/// A node's network identity.
pub type Endpoint = IpAddr;

/// Topology version published by the cluster's topology coordinator.
pub type Version = u64;

/// Identifier of an execution worker (shard) holding its own ring snapshot.
pub type ShardId = u32;

/// A position on the circular token space.
///
/// Tokens are ordered by their signed value. The space wraps from
/// [`Token::MAX`] back to [`Token::MIN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Token(pub i64);

impl Token {
    /// Smallest token on the ring.
    pub const MIN: Token = Token(i64::MIN);

    /// Largest token on the ring.
    pub const MAX: Token = Token(i64::MAX);

    /// Create a token from its raw value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for Token {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Token {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Token)
    }
}

/// Stable identity of a node that survives address changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(pub Uuid);

impl HostId {
    /// Generate a random host id.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil id, meaning "not assigned".
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Whether this id is assigned.
    pub fn is_set(&self) -> bool {
        !self.0.is_nil()
    }
}

impl Default for HostId {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HostId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(HostId)
    }
}

/// Datacenter and rack a node lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DcRack {
    pub dc: String,
    pub rack: String,
}

impl DcRack {
    pub fn new(dc: impl Into<String>, rack: impl Into<String>) -> Self {
        Self {
            dc: dc.into(),
            rack: rack.into(),
        }
    }
}

impl Default for DcRack {
    fn default() -> Self {
        Self::new("datacenter1", "rack1")
    }
}

impl fmt::Display for DcRack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dc, self.rack)
    }
}

/// Topology state attribute of a node.
///
/// This is bookkeeping carried alongside dc/rack. Ring membership itself is
/// derived from the token, bootstrap, leaving and replacing maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeState {
    #[default]
    None,
    Joining,
    Normal,
    Leaving,
    Left,
    Replacing,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::None => write!(f, "none"),
            NodeState::Joining => write!(f, "joining"),
            NodeState::Normal => write!(f, "normal"),
            NodeState::Leaving => write!(f, "leaving"),
            NodeState::Left => write!(f, "left"),
            NodeState::Replacing => write!(f, "replacing"),
        }
    }
}
