//! Configuration types for the token ring.

use crate::types::{DcRack, Endpoint, Version};
use std::net::{IpAddr, Ipv4Addr};

/// Default number of map entries processed between cooperative yields.
pub const DEFAULT_YIELD_QUANTUM: usize = 1024;

/// Configuration of a single token ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingConfig {
    /// Address of the local node. The initial ring is bound to it.
    pub local_endpoint: Endpoint,

    /// Datacenter and rack of the local node.
    pub local_dc_rack: DcRack,

    /// Maximum number of entries copied or released by clone/clear loops
    /// before yielding to the scheduler.
    pub yield_quantum: usize,

    /// Version of the initial, empty ring.
    pub initial_version: Version,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            local_endpoint: IpAddr::V4(Ipv4Addr::LOCALHOST),
            local_dc_rack: DcRack::default(),
            yield_quantum: DEFAULT_YIELD_QUANTUM,
            initial_version: 0,
        }
    }
}

impl RingConfig {
    /// Create a new configuration bound to the given local endpoint.
    pub fn new(local_endpoint: Endpoint) -> Self {
        Self {
            local_endpoint,
            ..Default::default()
        }
    }

    /// Set the local datacenter and rack.
    pub fn with_local_dc_rack(mut self, dc_rack: DcRack) -> Self {
        self.local_dc_rack = dc_rack;
        self
    }

    /// Set the yield quantum. Zero is treated as one.
    pub fn with_yield_quantum(mut self, quantum: usize) -> Self {
        self.yield_quantum = quantum.max(1);
        self
    }

    /// Set the version of the initial ring.
    pub fn with_initial_version(mut self, version: Version) -> Self {
        self.initial_version = version;
        self
    }
}

/// Configuration of the per-worker snapshot distributors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributorConfig {
    /// Number of execution workers, each holding its own snapshot.
    pub num_shards: u32,

    /// Configuration of the initial ring.
    pub ring: RingConfig,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            num_shards: 1,
            ring: RingConfig::default(),
        }
    }
}

impl DistributorConfig {
    /// Create a new config for the given number of workers.
    pub fn new(num_shards: u32) -> Self {
        Self {
            num_shards: num_shards.max(1),
            ..Default::default()
        }
    }

    /// Set the ring configuration.
    pub fn with_ring_config(mut self, ring: RingConfig) -> Self {
        self.ring = ring;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let ep: Endpoint = "10.0.0.1".parse().unwrap();
        let cfg = RingConfig::new(ep)
            .with_local_dc_rack(DcRack::new("dc2", "r7"))
            .with_yield_quantum(0)
            .with_initial_version(4);
        assert_eq!(cfg.local_endpoint, ep);
        assert_eq!(cfg.local_dc_rack.dc, "dc2");
        assert_eq!(cfg.yield_quantum, 1);
        assert_eq!(cfg.initial_version, 4);

        let dist = DistributorConfig::new(0).with_ring_config(cfg.clone());
        assert_eq!(dist.num_shards, 1);
        assert_eq!(dist.ring, cfg);
    }
}
