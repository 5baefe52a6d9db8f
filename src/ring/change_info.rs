//! Topology change overlay: the ring as it will look once every pending
//! bootstrap, leave and replace has completed.
//!
//! Computing pending ownership costs tokens × nodes, so the overlay is built
//! once per topology change and cached on the ring rather than recomputed
//! per request.

use super::token_ring::TokenRing;
use crate::error::Result;
use crate::types::{DcRack, Endpoint, NodeState, Token};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;

/// Supplies the datacenter and rack of endpoints that are about to own
/// tokens.
pub trait DcRackResolver: Send + Sync {
    fn resolve(&self, endpoint: Endpoint) -> Option<DcRack>;
}

impl<F> DcRackResolver for F
where
    F: Fn(Endpoint) -> Option<DcRack> + Send + Sync,
{
    fn resolve(&self, endpoint: Endpoint) -> Option<DcRack> {
        self(endpoint)
    }
}

/// A token whose owner differs between the serving and the target ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenOwnershipChange {
    pub token: Token,
    /// Owner in the ring currently serving reads, if any.
    pub from: Option<Endpoint>,
    /// Owner once every pending operation completes, if any.
    pub to: Option<Endpoint>,
}

/// Current vs. target ownership during a topology change.
#[derive(Debug, PartialEq, Eq)]
pub struct TopologyChangeInfo {
    /// The ring with every pending operation applied.
    pub target: TokenRing,

    /// The ring currently serving, when it cannot simply be the ring the
    /// overlay is attached to. This is the case when a node is replaced by
    /// a node with the same address.
    pub base: Option<TokenRing>,

    /// Sorted union of normal and bootstrap tokens.
    pub all_tokens: Vec<Token>,

    /// Route new reads against `target` instead of the base.
    pub read_new: bool,
}

impl TopologyChangeInfo {
    /// Build the overlay for `ring`, or `None` if nothing is pending.
    pub(crate) async fn build<R>(ring: &TokenRing, resolver: &R) -> Result<Option<Self>>
    where
        R: DcRackResolver + ?Sized,
    {
        let bootstrap = ring.get_bootstrap_tokens();
        let leaving = ring.get_leaving_endpoints();
        let replacing = ring.get_replacing_endpoints();

        if bootstrap.is_empty() && leaving.is_empty() && replacing.is_empty() {
            return Ok(None);
        }

        let mut target = ring.clone_only_token_map().await;
        let mut replace_with_same_endpoint = false;

        // BTreeMap keeps the order of application deterministic.
        let mut new_normal_tokens: BTreeMap<Endpoint, BTreeSet<Token>> = BTreeMap::new();
        if !replacing.is_empty() {
            for (token, endpoint) in ring.get_token_to_endpoint() {
                if let Some(replacement) = replacing.get(endpoint) {
                    new_normal_tokens
                        .entry(*replacement)
                        .or_default()
                        .insert(*token);
                }
            }
            for (existing, replacement) in replacing {
                if existing == replacement {
                    replace_with_same_endpoint = true;
                } else {
                    target.remove_endpoint(*existing);
                }
            }
        }
        for (token, endpoint) in bootstrap {
            new_normal_tokens.entry(*endpoint).or_default().insert(*token);
        }

        for (endpoint, tokens) in new_normal_tokens {
            let dc_rack = resolver
                .resolve(endpoint)
                .or_else(|| ring.get_topology().get_location(endpoint).cloned())
                .unwrap_or_else(|| ring.get_topology().local_dc_rack().clone());
            target.update_topology(endpoint, dc_rack, Some(NodeState::Normal), None);
            target.update_normal_tokens(tokens, endpoint).await?;
        }

        for endpoint in leaving {
            target.remove_endpoint(*endpoint);
        }

        let base = if replace_with_same_endpoint {
            Some(ring.clone_only_token_map().await)
        } else {
            None
        };

        let all_tokens: Vec<Token> = ring
            .sorted_tokens()
            .iter()
            .chain(bootstrap.keys())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        tracing::debug!(
            pending_bootstrap = bootstrap.len(),
            leaving = leaving.len(),
            replacing = replacing.len(),
            target_tokens = target.sorted_tokens().len(),
            read_new = ring.get_read_new(),
            "Rebuilt topology change info"
        );

        Ok(Some(Self {
            target,
            base,
            all_tokens,
            read_new: ring.get_read_new(),
        }))
    }

    /// The ring currently serving, given the ring this overlay belongs to.
    pub fn base_ring<'a>(&'a self, current: &'a TokenRing) -> &'a TokenRing {
        self.base.as_ref().unwrap_or(current)
    }

    /// The ring new reads should be routed against.
    pub fn ring_for_reads<'a>(&'a self, current: &'a TokenRing) -> &'a TokenRing {
        if self.read_new {
            &self.target
        } else {
            self.base_ring(current)
        }
    }

    /// Writes always go to the target ownership.
    pub fn ring_for_writes(&self) -> &TokenRing {
        &self.target
    }

    /// Tokens whose owner changes between the base and the target ring.
    pub fn ownership_changes(&self, current: &TokenRing) -> Vec<TokenOwnershipChange> {
        let base = self.base_ring(current);
        self.all_tokens
            .iter()
            .filter_map(|token| {
                let from = base.get_endpoint(*token);
                let to = self.target.get_endpoint(*token);
                (from != to).then_some(TokenOwnershipChange {
                    token: *token,
                    from,
                    to,
                })
            })
            .collect()
    }

    /// Release the contained rings in bounded chunks.
    pub fn clear_gently(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.target.clear_gently().await;
            if let Some(base) = self.base.as_mut() {
                base.clear_gently().await;
            }
            self.all_tokens = Vec::new();
        })
    }
}
