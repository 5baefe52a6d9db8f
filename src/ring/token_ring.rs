//! Token ownership, lifecycle sets and host identity for one ring version.

use super::algorithms::{self, RingIter, RingPosition, TokenRange};
use super::change_info::{DcRackResolver, TopologyChangeInfo};
use super::host_id::{HostIdOrEndpoint, ParamType};
use super::topology::Topology;
use super::YieldBudget;
use crate::config::RingConfig;
use crate::error::{Error, Result};
use crate::types::{DcRack, Endpoint, HostId, NodeState, Token, Version};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide source of ring versions. Every ownership change and every
/// copy draws a fresh value, so two distinct rings never share one.
static RING_VERSION: AtomicU64 = AtomicU64::new(0);

fn next_ring_version() -> u64 {
    RING_VERSION.fetch_add(1, Ordering::SeqCst) + 1
}

/// The consistent-hashing token ring.
///
/// Holds normal token ownership and its inverse, tokens reserved by joining
/// nodes, the leaving set, the replacing relation, host ids and topology
/// attributes, plus the topology version it was published under.
///
/// Lifecycle of a node is derived from set membership:
/// - *normal*: owns at least one token in the token → endpoint map
/// - *bootstrapping*: has entries in the bootstrap token map
/// - *leaving*: normal and in the leaving set
/// - *replacing*: an existing → replacement relation layered on a normal node
#[derive(Debug)]
pub struct TokenRing {
    sorted_tokens: Vec<Token>,
    token_to_endpoint: HashMap<Token, Endpoint>,
    endpoint_to_tokens: HashMap<Endpoint, BTreeSet<Token>>,

    bootstrap_tokens: HashMap<Token, Endpoint>,
    leaving_endpoints: HashSet<Endpoint>,
    /// existing node → replacement node
    replacing_endpoints: HashMap<Endpoint, Endpoint>,

    endpoint_to_host_id: HashMap<Endpoint, HostId>,
    host_id_to_endpoint: HashMap<HostId, Endpoint>,

    topology: Topology,
    topology_change_info: Option<Arc<TopologyChangeInfo>>,

    read_new: bool,
    version: Version,
    ring_version: u64,
    yield_quantum: usize,
}

impl TokenRing {
    /// Create an empty ring bound to the local node.
    pub fn new(config: RingConfig) -> Self {
        Self {
            sorted_tokens: Vec::new(),
            token_to_endpoint: HashMap::new(),
            endpoint_to_tokens: HashMap::new(),
            bootstrap_tokens: HashMap::new(),
            leaving_endpoints: HashSet::new(),
            replacing_endpoints: HashMap::new(),
            endpoint_to_host_id: HashMap::new(),
            host_id_to_endpoint: HashMap::new(),
            topology: Topology::new(&config),
            topology_change_info: None,
            read_new: false,
            version: config.initial_version,
            ring_version: next_ring_version(),
            yield_quantum: config.yield_quantum.max(1),
        }
    }

    /// An empty ring that inherits everything except ownership state.
    fn empty_like(&self) -> Self {
        Self {
            sorted_tokens: Vec::with_capacity(self.sorted_tokens.len()),
            token_to_endpoint: HashMap::with_capacity(self.token_to_endpoint.len()),
            endpoint_to_tokens: HashMap::with_capacity(self.endpoint_to_tokens.len()),
            bootstrap_tokens: HashMap::new(),
            leaving_endpoints: HashSet::new(),
            replacing_endpoints: HashMap::new(),
            endpoint_to_host_id: HashMap::with_capacity(self.endpoint_to_host_id.len()),
            host_id_to_endpoint: HashMap::with_capacity(self.host_id_to_endpoint.len()),
            topology: Topology::empty(
                self.topology.local_endpoint(),
                self.topology.local_dc_rack().clone(),
            ),
            topology_change_info: None,
            read_new: self.read_new,
            version: self.version,
            ring_version: next_ring_version(),
            yield_quantum: self.yield_quantum,
        }
    }

    // ---------------------------------------------------------------------
    // Structural copies
    // ---------------------------------------------------------------------

    /// Full value copy, yielding between chunks.
    ///
    /// The source must not change while the copy is in flight. Holding it
    /// behind a shared `Arc` (a published snapshot) guarantees that.
    pub async fn clone_async(&self) -> TokenRing {
        let mut ret = self.clone_only_token_map().await;
        let mut budget = YieldBudget::new(self.yield_quantum);

        for (token, endpoint) in &self.bootstrap_tokens {
            ret.bootstrap_tokens.insert(*token, *endpoint);
            budget.tick().await;
        }
        for endpoint in &self.leaving_endpoints {
            ret.leaving_endpoints.insert(*endpoint);
            budget.tick().await;
        }
        for (existing, replacement) in &self.replacing_endpoints {
            ret.replacing_endpoints.insert(*existing, *replacement);
            budget.tick().await;
        }
        ret.topology_change_info = self.topology_change_info.clone();
        ret
    }

    /// Copy of the live token → endpoint ownership only.
    ///
    /// Bootstrap tokens, leaving endpoints, replacements and the topology
    /// change overlay are dropped. Host ids, topology, version and the
    /// read-new flag are kept.
    pub async fn clone_only_token_map(&self) -> TokenRing {
        let mut ret = self.empty_like();
        let mut budget = YieldBudget::new(self.yield_quantum);

        for token in &self.sorted_tokens {
            ret.sorted_tokens.push(*token);
            budget.tick().await;
        }
        for (token, endpoint) in &self.token_to_endpoint {
            ret.token_to_endpoint.insert(*token, *endpoint);
            budget.tick().await;
        }
        for (endpoint, tokens) in &self.endpoint_to_tokens {
            ret.endpoint_to_tokens.insert(*endpoint, tokens.clone());
            budget.tick().await;
        }
        for (endpoint, id) in &self.endpoint_to_host_id {
            ret.endpoint_to_host_id.insert(*endpoint, *id);
            ret.host_id_to_endpoint.insert(*id, *endpoint);
            budget.tick().await;
        }
        for node in self.topology.nodes() {
            ret.topology.update_endpoint(
                node.endpoint,
                node.dc_rack.clone(),
                Some(node.state),
                node.shard_count,
            );
            budget.tick().await;
        }
        ret
    }

    /// Copy of the ring as it will look once every leaving node has left.
    pub async fn clone_after_all_left(&self) -> TokenRing {
        let mut ret = self.clone_only_token_map().await;
        for endpoint in &self.leaving_endpoints {
            ret.remove_endpoint(*endpoint);
        }
        ret
    }

    /// Release the internal maps in bounded chunks.
    pub async fn clear_gently(&mut self) {
        let mut budget = YieldBudget::new(self.yield_quantum);

        if let Some(info) = self.topology_change_info.take() {
            // Another ring may still share the overlay; only the last
            // holder tears it down.
            if let Ok(mut info) = Arc::try_unwrap(info) {
                info.clear_gently().await;
            }
        }

        for _ in self.token_to_endpoint.drain() {
            budget.tick().await;
        }
        for _ in self.endpoint_to_tokens.drain() {
            budget.tick().await;
        }
        for _ in self.bootstrap_tokens.drain() {
            budget.tick().await;
        }
        for _ in self.endpoint_to_host_id.drain() {
            budget.tick().await;
        }
        for _ in self.host_id_to_endpoint.drain() {
            budget.tick().await;
        }
        self.sorted_tokens = Vec::new();
        self.leaving_endpoints.clear();
        self.replacing_endpoints.clear();
        self.topology.clear();
        self.invalidate_cached_rings();
    }

    // ---------------------------------------------------------------------
    // Token ownership
    // ---------------------------------------------------------------------

    /// Make `tokens` the complete set of normal tokens owned by `endpoint`.
    ///
    /// Tokens move away from any previous owner, tokens the endpoint owned
    /// before but that are not in `tokens` are released, and the endpoint
    /// stops being bootstrapping or leaving. An empty set is a no-op.
    ///
    /// Must only be called on a private copy. If this fails the copy has to
    /// be discarded.
    pub async fn update_normal_tokens<I>(&mut self, tokens: I, endpoint: Endpoint) -> Result<()>
    where
        I: IntoIterator<Item = Token>,
    {
        let new_tokens: BTreeSet<Token> = tokens.into_iter().collect();
        if new_tokens.is_empty() {
            return Ok(());
        }
        if !self.topology.has_endpoint(endpoint) {
            return Err(Error::InvalidArgument(format!(
                "endpoint {} is not a member of the topology",
                endpoint
            )));
        }

        let mut budget = YieldBudget::new(self.yield_quantum);

        let old_tokens = self.endpoint_to_tokens.remove(&endpoint).unwrap_or_default();
        for token in &old_tokens {
            if !new_tokens.contains(token) {
                self.token_to_endpoint.remove(token);
            }
            budget.tick().await;
        }

        self.bootstrap_tokens
            .retain(|t, e| *e != endpoint && !new_tokens.contains(t));
        self.leaving_endpoints.remove(&endpoint);

        for token in &new_tokens {
            if let Some(prev) = self.token_to_endpoint.insert(*token, endpoint) {
                if prev != endpoint {
                    tracing::debug!(
                        token = %token,
                        from = %prev,
                        to = %endpoint,
                        "Token changing ownership"
                    );
                    if let Some(prev_tokens) = self.endpoint_to_tokens.get_mut(&prev) {
                        prev_tokens.remove(token);
                        if prev_tokens.is_empty() {
                            self.endpoint_to_tokens.remove(&prev);
                        }
                    }
                }
            }
            budget.tick().await;
        }
        self.endpoint_to_tokens.insert(endpoint, new_tokens);

        self.sort_tokens();
        self.invalidate_cached_rings();
        Ok(())
    }

    fn sort_tokens(&mut self) {
        let mut sorted: Vec<Token> = self.token_to_endpoint.keys().copied().collect();
        sorted.sort_unstable();
        self.sorted_tokens = sorted;
    }

    /// Reserve a token for a joining node.
    pub fn add_bootstrap_token(&mut self, token: Token, endpoint: Endpoint) -> Result<()> {
        self.add_bootstrap_tokens([token], endpoint)
    }

    /// Reserve tokens for a joining node, replacing any it reserved before.
    ///
    /// Fails without changing anything if a token is already reserved by, or
    /// normally owned by, a different endpoint.
    pub fn add_bootstrap_tokens<I>(&mut self, tokens: I, endpoint: Endpoint) -> Result<()>
    where
        I: IntoIterator<Item = Token>,
    {
        let tokens: Vec<Token> = tokens.into_iter().collect();
        for token in &tokens {
            let collision = [self.bootstrap_tokens.get(token), self.token_to_endpoint.get(token)]
                .into_iter()
                .flatten()
                .find(|owner| **owner != endpoint);
            if let Some(owner) = collision {
                tracing::warn!(token = %token, owner = %owner, endpoint = %endpoint, "Bootstrap token collision");
                return Err(Error::InvalidArgument(format!(
                    "bootstrap token collision between {} and {} (token {})",
                    owner, endpoint, token
                )));
            }
        }

        self.bootstrap_tokens.retain(|_, e| *e != endpoint);
        for token in tokens {
            self.bootstrap_tokens.insert(token, endpoint);
        }
        Ok(())
    }

    /// Drop bootstrap reservations.
    pub fn remove_bootstrap_tokens<I>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = Token>,
    {
        for token in tokens {
            self.bootstrap_tokens.remove(&token);
        }
    }

    /// Mark a normal endpoint as draining.
    pub fn add_leaving_endpoint(&mut self, endpoint: Endpoint) {
        self.leaving_endpoints.insert(endpoint);
    }

    pub fn del_leaving_endpoint(&mut self, endpoint: Endpoint) {
        self.leaving_endpoints.remove(&endpoint);
    }

    /// Record that `replacement` is taking over from `existing`.
    pub fn add_replacing_endpoint(&mut self, existing: Endpoint, replacement: Endpoint) {
        if existing == replacement {
            tracing::debug!(endpoint = %existing, "Node replaced using the same address");
        }
        self.replacing_endpoints.insert(existing, replacement);
    }

    pub fn del_replacing_endpoint(&mut self, existing: Endpoint) {
        self.replacing_endpoints.remove(&existing);
    }

    /// Strip a node from every map.
    pub fn remove_endpoint(&mut self, endpoint: Endpoint) {
        self.bootstrap_tokens.retain(|_, e| *e != endpoint);
        if let Some(tokens) = self.endpoint_to_tokens.remove(&endpoint) {
            for token in &tokens {
                self.token_to_endpoint.remove(token);
            }
            self.sort_tokens();
        }
        self.leaving_endpoints.remove(&endpoint);
        self.replacing_endpoints
            .retain(|existing, replacement| *existing != endpoint && *replacement != endpoint);
        if let Some(id) = self.endpoint_to_host_id.remove(&endpoint) {
            self.host_id_to_endpoint.remove(&id);
        }
        self.topology.remove_endpoint(endpoint);
        self.invalidate_cached_rings();
    }

    // ---------------------------------------------------------------------
    // Host ids and topology
    // ---------------------------------------------------------------------

    /// Bind a host id to an endpoint.
    ///
    /// Rebinding an id that already belongs to a different endpoint fails and
    /// leaves the ring unchanged. Repeating an existing binding is a no-op.
    pub fn update_host_id(&mut self, host_id: HostId, endpoint: Endpoint) -> Result<()> {
        if !host_id.is_set() {
            return Err(Error::InvalidArgument(format!(
                "cannot bind nil host id to {}",
                endpoint
            )));
        }
        match self.host_id_to_endpoint.get(&host_id) {
            Some(bound) if *bound == endpoint => return Ok(()),
            Some(bound) => {
                tracing::warn!(host_id = %host_id, bound = %bound, requested = %endpoint, "Rejecting host id rebind");
                return Err(Error::InvalidArgument(format!(
                    "host id {} is already bound to {}, cannot bind it to {}",
                    host_id, bound, endpoint
                )));
            }
            None => {}
        }

        if let Some(old_id) = self.endpoint_to_host_id.insert(endpoint, host_id) {
            self.host_id_to_endpoint.remove(&old_id);
        }
        self.host_id_to_endpoint.insert(host_id, endpoint);
        Ok(())
    }

    /// Insert or update the dc/rack, state and shard count of a node.
    pub fn update_topology(
        &mut self,
        endpoint: Endpoint,
        dc_rack: DcRack,
        state: Option<NodeState>,
        shard_count: Option<u32>,
    ) {
        self.topology.update_endpoint(endpoint, dc_rack, state, shard_count);
    }

    /// Switch new reads between the current and target ownership.
    pub fn set_read_new(&mut self, read_new: bool) {
        self.read_new = read_new;
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Mark ownership as changed. Ring-derived caches keyed on the ring
    /// version are invalidated.
    pub fn invalidate_cached_rings(&mut self) {
        self.ring_version = next_ring_version();
    }

    /// Rebuild the topology change overlay from the pending operations.
    ///
    /// Clears it when nothing is pending.
    pub async fn update_topology_change_info<R>(&mut self, resolver: &R) -> Result<()>
    where
        R: DcRackResolver + ?Sized,
    {
        let info = TopologyChangeInfo::build(self, resolver).await?;
        let previous = std::mem::replace(&mut self.topology_change_info, info.map(Arc::new));
        if let Some(previous) = previous {
            if let Ok(mut previous) = Arc::try_unwrap(previous) {
                previous.clear_gently().await;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Read-only accessors
    // ---------------------------------------------------------------------

    /// All normal tokens, ascending.
    pub fn sorted_tokens(&self) -> &[Token] {
        &self.sorted_tokens
    }

    /// First token `>= start`, wrapping.
    pub fn first_token(&self, start: Token) -> Option<Token> {
        algorithms::first_token(&self.sorted_tokens, start)
    }

    /// Index into [`sorted_tokens`](Self::sorted_tokens) of the first token
    /// `>= start`, wrapping.
    pub fn first_token_index(&self, start: Token) -> usize {
        algorithms::first_token_index(&self.sorted_tokens, start)
    }

    /// Walk every token once, starting at the first token `>= start`.
    pub fn ring_range(&self, start: Token) -> RingIter<'_> {
        algorithms::ring_range(&self.sorted_tokens, start)
    }

    /// Walk every token once, starting past a scan boundary.
    pub fn ring_range_from_position(&self, start: RingPosition) -> RingIter<'_> {
        algorithms::ring_range_from_position(&self.sorted_tokens, start)
    }

    /// Greatest token strictly less than `token`, wrapping.
    pub fn get_predecessor(&self, token: Token) -> Option<Token> {
        algorithms::predecessor(&self.sorted_tokens, token)
    }

    /// The primary range `(predecessor(token), token]`.
    pub fn get_primary_range_for(&self, token: Token) -> Option<TokenRange> {
        algorithms::primary_range_for(&self.sorted_tokens, token)
    }

    /// One primary range per token.
    pub fn get_primary_ranges_for<I>(&self, tokens: I) -> Vec<TokenRange>
    where
        I: IntoIterator<Item = Token>,
    {
        algorithms::primary_ranges_for(&self.sorted_tokens, tokens)
    }

    /// Number of distinct endpoints owning at least one normal token.
    pub fn count_normal_token_owners(&self) -> usize {
        self.endpoint_to_tokens.len()
    }

    pub fn get_endpoint(&self, token: Token) -> Option<Endpoint> {
        self.token_to_endpoint.get(&token).copied()
    }

    /// Normal tokens of an endpoint, ascending.
    pub fn get_tokens(&self, endpoint: Endpoint) -> Vec<Token> {
        self.endpoint_to_tokens
            .get(&endpoint)
            .map(|tokens| tokens.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn get_token_to_endpoint(&self) -> &HashMap<Token, Endpoint> {
        &self.token_to_endpoint
    }

    pub fn get_bootstrap_tokens(&self) -> &HashMap<Token, Endpoint> {
        &self.bootstrap_tokens
    }

    pub fn get_leaving_endpoints(&self) -> &HashSet<Endpoint> {
        &self.leaving_endpoints
    }

    /// existing node → replacement node
    pub fn get_replacing_endpoints(&self) -> &HashMap<Endpoint, Endpoint> {
        &self.replacing_endpoints
    }

    /// Host id of an endpoint.
    pub fn get_host_id(&self, endpoint: Endpoint) -> Result<HostId> {
        self.get_host_id_if_known(endpoint)
            .ok_or_else(|| Error::NotFound(format!("host id for endpoint {}", endpoint)))
    }

    pub fn get_host_id_if_known(&self, endpoint: Endpoint) -> Option<HostId> {
        self.endpoint_to_host_id.get(&endpoint).copied()
    }

    pub fn get_endpoint_for_host_id(&self, host_id: HostId) -> Option<Endpoint> {
        self.host_id_to_endpoint.get(&host_id).copied()
    }

    /// Copy of the endpoint → host id map.
    pub fn get_endpoint_to_host_id_map_for_reading(&self) -> HashMap<Endpoint, HostId> {
        self.endpoint_to_host_id.clone()
    }

    /// Host id of the local node.
    pub fn get_my_id(&self) -> Result<HostId> {
        self.get_host_id(self.topology.local_endpoint())
    }

    /// Parse `s` as a host id or an address and resolve the other half.
    ///
    /// Malformed input is an invalid-argument failure; a well-formed value
    /// unknown to this ring is a not-found failure.
    pub fn parse_host_id_and_endpoint(&self, s: &str) -> Result<HostIdOrEndpoint> {
        let mut parsed = HostIdOrEndpoint::parse(s, ParamType::AutoDetect)?;
        parsed.resolve(self)?;
        Ok(parsed)
    }

    pub fn is_normal_token_owner(&self, endpoint: Endpoint) -> bool {
        self.endpoint_to_tokens.contains_key(&endpoint)
    }

    pub fn is_leaving(&self, endpoint: Endpoint) -> bool {
        self.leaving_endpoints.contains(&endpoint)
    }

    /// Whether `endpoint` is an existing node being replaced.
    pub fn is_being_replaced(&self, endpoint: Endpoint) -> bool {
        self.replacing_endpoints.contains_key(&endpoint)
    }

    pub fn is_any_node_being_replaced(&self) -> bool {
        !self.replacing_endpoints.is_empty()
    }

    /// Endpoints owning at least one normal token.
    pub fn get_all_endpoints(&self) -> HashSet<Endpoint> {
        self.endpoint_to_tokens.keys().copied().collect()
    }

    /// Endpoint → tokens view, both ascending.
    pub fn get_endpoint_to_token_map_for_reading(&self) -> BTreeMap<Endpoint, Vec<Token>> {
        self.endpoint_to_tokens
            .iter()
            .map(|(endpoint, tokens)| (*endpoint, tokens.iter().copied().collect()))
            .collect()
    }

    /// Ordered token → endpoint map of normal and bootstrapping nodes.
    pub fn get_normal_and_bootstrapping_token_to_endpoint_map(&self) -> BTreeMap<Token, Endpoint> {
        self.token_to_endpoint
            .iter()
            .chain(self.bootstrap_tokens.iter())
            .map(|(t, e)| (*t, *e))
            .collect()
    }

    pub fn get_topology(&self) -> &Topology {
        &self.topology
    }

    pub fn get_topology_change_info(&self) -> Option<&Arc<TopologyChangeInfo>> {
        self.topology_change_info.as_ref()
    }

    pub fn get_read_new(&self) -> bool {
        self.read_new
    }

    pub fn get_version(&self) -> Version {
        self.version
    }

    pub fn get_ring_version(&self) -> u64 {
        self.ring_version
    }

    /// Dump the ring to the debug log.
    pub fn debug_show(&self) {
        tracing::debug!(
            version = self.version,
            ring_version = self.ring_version,
            tokens = self.sorted_tokens.len(),
            owners = self.endpoint_to_tokens.len(),
            "Token ring"
        );
        for (endpoint, tokens) in self.get_endpoint_to_token_map_for_reading() {
            tracing::debug!(endpoint = %endpoint, tokens = ?tokens, "Normal tokens");
        }
        for (token, endpoint) in &self.bootstrap_tokens {
            tracing::debug!(token = %token, endpoint = %endpoint, "Bootstrap token");
        }
        for endpoint in &self.leaving_endpoints {
            tracing::debug!(endpoint = %endpoint, "Leaving");
        }
        for (existing, replacement) in &self.replacing_endpoints {
            tracing::debug!(existing = %existing, replacement = %replacement, "Replacing");
        }
    }
}

impl PartialEq for TokenRing {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.read_new == other.read_new
            && self.sorted_tokens == other.sorted_tokens
            && self.token_to_endpoint == other.token_to_endpoint
            && self.endpoint_to_tokens == other.endpoint_to_tokens
            && self.bootstrap_tokens == other.bootstrap_tokens
            && self.leaving_endpoints == other.leaving_endpoints
            && self.replacing_endpoints == other.replacing_endpoints
            && self.endpoint_to_host_id == other.endpoint_to_host_id
            && self.host_id_to_endpoint == other.host_id_to_endpoint
            && self.topology == other.topology
    }
}

impl Eq for TokenRing {}
