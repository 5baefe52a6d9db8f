//! Token boundaries for splitting a scan of the ring into sub-ranges.

use super::algorithms::{first_token_index_for_position, RingPosition};
use super::token_ring::TokenRing;
use crate::types::Token;
use std::sync::Arc;

/// Yields the ring's tokens in ring order from a chosen position, each at
/// most once.
///
/// The splitter keeps the ring it was created from alive, so it can outlive
/// the snapshot it was taken from and is unaffected by later publishes.
/// Nothing is yielded until [`reset`](Self::reset) is called.
#[derive(Debug, Clone)]
pub struct TokenRangeSplitter {
    ring: Arc<TokenRing>,
    pos: usize,
    remaining: usize,
}

impl TokenRangeSplitter {
    pub fn new(ring: Arc<TokenRing>) -> Self {
        Self {
            ring,
            pos: 0,
            remaining: 0,
        }
    }

    /// Restart at the first token past `start`, wrapping.
    pub fn reset(&mut self, start: RingPosition) {
        let sorted = self.ring.sorted_tokens();
        self.pos = first_token_index_for_position(sorted, start);
        self.remaining = sorted.len();
    }

    /// The next split point, or `None` once every token has been yielded.
    pub fn next_token(&mut self) -> Option<Token> {
        if self.remaining == 0 {
            return None;
        }
        let sorted = self.ring.sorted_tokens();
        let token = sorted[self.pos];
        self.pos = (self.pos + 1) % sorted.len();
        self.remaining -= 1;
        Some(token)
    }

    pub fn ring(&self) -> &Arc<TokenRing> {
        &self.ring
    }
}

impl Iterator for TokenRangeSplitter {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.next_token()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
