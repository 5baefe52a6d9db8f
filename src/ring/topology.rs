//! Per-endpoint topology attributes: datacenter, rack, state and shard count.
//!
//! These are independent of token ownership. A node can be known to the
//! topology long before it owns any token.

use crate::config::RingConfig;
use crate::types::{DcRack, Endpoint, NodeState};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Attributes of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub endpoint: Endpoint,
    pub dc_rack: DcRack,
    pub state: NodeState,
    /// Number of execution workers on the node, once known.
    pub shard_count: Option<u32>,
}

/// Topology of the cluster as known to one ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    local_endpoint: Endpoint,
    local_dc_rack: DcRack,

    nodes: HashMap<Endpoint, NodeInfo>,

    /// Endpoints per datacenter.
    dc_endpoints: HashMap<String, HashSet<Endpoint>>,

    /// Endpoints per rack, per datacenter.
    dc_racks: HashMap<String, HashMap<String, HashSet<Endpoint>>>,
}

impl Topology {
    /// Create a topology holding only the local node.
    pub fn new(config: &RingConfig) -> Self {
        let mut topology = Self::empty(config.local_endpoint, config.local_dc_rack.clone());
        topology.update_endpoint(
            config.local_endpoint,
            config.local_dc_rack.clone(),
            None,
            None,
        );
        topology
    }

    /// Create a topology with no nodes at all.
    pub(crate) fn empty(local_endpoint: Endpoint, local_dc_rack: DcRack) -> Self {
        Self {
            local_endpoint,
            local_dc_rack,
            nodes: HashMap::new(),
            dc_endpoints: HashMap::new(),
            dc_racks: HashMap::new(),
        }
    }

    /// The local node's endpoint.
    pub fn local_endpoint(&self) -> Endpoint {
        self.local_endpoint
    }

    /// The local node's datacenter and rack.
    pub fn local_dc_rack(&self) -> &DcRack {
        &self.local_dc_rack
    }

    /// Insert or update a node's attributes.
    ///
    /// `state` and `shard_count` are only overwritten when given. Calling this
    /// again with the same arguments is a no-op. Returns `true` if anything
    /// changed.
    pub fn update_endpoint(
        &mut self,
        endpoint: Endpoint,
        dc_rack: DcRack,
        state: Option<NodeState>,
        shard_count: Option<u32>,
    ) -> bool {
        let changed = match self.nodes.get_mut(&endpoint) {
            Some(node) => {
                let mut changed = false;
                if node.dc_rack != dc_rack {
                    let old = std::mem::replace(&mut node.dc_rack, dc_rack.clone());
                    Self::unindex(&mut self.dc_endpoints, &mut self.dc_racks, endpoint, &old);
                    Self::index(&mut self.dc_endpoints, &mut self.dc_racks, endpoint, &dc_rack);
                    changed = true;
                }
                if let Some(state) = state {
                    changed |= node.state != state;
                    node.state = state;
                }
                if let Some(count) = shard_count {
                    changed |= node.shard_count != Some(count);
                    node.shard_count = Some(count);
                }
                changed
            }
            None => {
                Self::index(&mut self.dc_endpoints, &mut self.dc_racks, endpoint, &dc_rack);
                self.nodes.insert(
                    endpoint,
                    NodeInfo {
                        endpoint,
                        dc_rack,
                        state: state.unwrap_or_default(),
                        shard_count,
                    },
                );
                true
            }
        };

        if changed {
            tracing::trace!(endpoint = %endpoint, "Updated topology");
        }
        changed
    }

    /// Remove a node. Returns its attributes if it was known.
    pub fn remove_endpoint(&mut self, endpoint: Endpoint) -> Option<NodeInfo> {
        let node = self.nodes.remove(&endpoint)?;
        Self::unindex(&mut self.dc_endpoints, &mut self.dc_racks, endpoint, &node.dc_rack);
        Some(node)
    }

    /// Check if a node is known.
    pub fn has_endpoint(&self, endpoint: Endpoint) -> bool {
        self.nodes.contains_key(&endpoint)
    }

    /// Get a node's attributes.
    pub fn get_node(&self, endpoint: Endpoint) -> Option<&NodeInfo> {
        self.nodes.get(&endpoint)
    }

    /// Datacenter and rack of a node, if known.
    pub fn get_location(&self, endpoint: Endpoint) -> Option<&DcRack> {
        self.nodes.get(&endpoint).map(|n| &n.dc_rack)
    }

    /// Datacenter of a node, if known.
    pub fn get_datacenter(&self, endpoint: Endpoint) -> Option<&str> {
        self.get_location(endpoint).map(|l| l.dc.as_str())
    }

    /// Rack of a node, if known.
    pub fn get_rack(&self, endpoint: Endpoint) -> Option<&str> {
        self.get_location(endpoint).map(|l| l.rack.as_str())
    }

    /// Endpoints grouped by datacenter.
    pub fn get_datacenter_endpoints(&self) -> &HashMap<String, HashSet<Endpoint>> {
        &self.dc_endpoints
    }

    /// Endpoints grouped by datacenter, then rack.
    pub fn get_datacenter_racks(&self) -> &HashMap<String, HashMap<String, HashSet<Endpoint>>> {
        &self.dc_racks
    }

    /// Names of all datacenters with at least one node.
    pub fn get_datacenters(&self) -> HashSet<String> {
        self.dc_endpoints.keys().cloned().collect()
    }

    /// Iterate all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.dc_endpoints.clear();
        self.dc_racks.clear();
    }

    fn index(
        dc_endpoints: &mut HashMap<String, HashSet<Endpoint>>,
        dc_racks: &mut HashMap<String, HashMap<String, HashSet<Endpoint>>>,
        endpoint: Endpoint,
        dc_rack: &DcRack,
    ) {
        dc_endpoints
            .entry(dc_rack.dc.clone())
            .or_default()
            .insert(endpoint);
        dc_racks
            .entry(dc_rack.dc.clone())
            .or_default()
            .entry(dc_rack.rack.clone())
            .or_default()
            .insert(endpoint);
    }

    fn unindex(
        dc_endpoints: &mut HashMap<String, HashSet<Endpoint>>,
        dc_racks: &mut HashMap<String, HashMap<String, HashSet<Endpoint>>>,
        endpoint: Endpoint,
        dc_rack: &DcRack,
    ) {
        if let Some(eps) = dc_endpoints.get_mut(&dc_rack.dc) {
            eps.remove(&endpoint);
            if eps.is_empty() {
                dc_endpoints.remove(&dc_rack.dc);
            }
        }
        if let Some(racks) = dc_racks.get_mut(&dc_rack.dc) {
            if let Some(eps) = racks.get_mut(&dc_rack.rack) {
                eps.remove(&endpoint);
                if eps.is_empty() {
                    racks.remove(&dc_rack.rack);
                }
            }
            if racks.is_empty() {
                dc_racks.remove(&dc_rack.dc);
            }
        }
    }
}
