//! Pure ring algorithms over a sorted token list.
//!
//! Every function here assumes `sorted` is strictly ascending. Lookups are
//! binary searches, never linear scans.

use crate::types::Token;
use serde::{Deserialize, Serialize};

/// Whether a ring position sits at its token or just past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionBound {
    /// At (or before) the token: the token itself is included.
    Inclusive,
    /// Strictly after the token.
    Exclusive,
}

/// A scan boundary on the ring that need not be a live token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RingPosition {
    pub token: Token,
    pub bound: PositionBound,
}

impl RingPosition {
    /// Position at `token`, including it.
    pub fn starting_at(token: Token) -> Self {
        Self {
            token,
            bound: PositionBound::Inclusive,
        }
    }

    /// Position strictly after `token`.
    pub fn after(token: Token) -> Self {
        Self {
            token,
            bound: PositionBound::Exclusive,
        }
    }
}

/// A wrapping token interval `(start, end]`.
///
/// When `start >= end` the range wraps past [`Token::MAX`]. `start == end`
/// covers the whole ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRange {
    /// Exclusive lower bound.
    pub start: Token,
    /// Inclusive upper bound.
    pub end: Token,
}

impl TokenRange {
    pub fn new(start: Token, end: Token) -> Self {
        Self { start, end }
    }

    /// Whether the range wraps around the end of the token space.
    pub fn is_wrap_around(&self) -> bool {
        self.start >= self.end
    }

    /// Check if a token falls inside the range.
    pub fn contains(&self, token: Token) -> bool {
        if self.is_wrap_around() {
            token > self.start || token <= self.end
        } else {
            token > self.start && token <= self.end
        }
    }

    /// Split a wrapping range into non-wrapping pieces.
    ///
    /// The pieces are `(start, MAX]` and `[MIN, end]`. Non-wrapping ranges
    /// come back unchanged.
    pub fn unwrap(&self) -> (TokenRange, Option<UnwrappedTail>) {
        if !self.is_wrap_around() {
            return (*self, None);
        }
        (
            TokenRange::new(self.start, Token::MAX),
            Some(UnwrappedTail { end: self.end }),
        )
    }
}

/// The `[MIN, end]` piece of an unwrapped range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnwrappedTail {
    /// Inclusive upper bound. The lower bound is [`Token::MIN`], inclusive.
    pub end: Token,
}

impl UnwrappedTail {
    pub fn contains(&self, token: Token) -> bool {
        token <= self.end
    }
}

/// Index of the first token `>= start`, wrapping to 0 past the end.
///
/// Returns 0 on an empty ring.
pub fn first_token_index(sorted: &[Token], start: Token) -> usize {
    let idx = sorted.partition_point(|t| *t < start);
    if idx >= sorted.len() {
        0
    } else {
        idx
    }
}

/// First token `>= start`, wrapping. `None` on an empty ring.
pub fn first_token(sorted: &[Token], start: Token) -> Option<Token> {
    sorted.get(first_token_index(sorted, start)).copied()
}

/// Index of the first token matching a ring position, wrapping.
pub fn first_token_index_for_position(sorted: &[Token], start: RingPosition) -> usize {
    let idx = match start.bound {
        PositionBound::Inclusive => sorted.partition_point(|t| *t < start.token),
        PositionBound::Exclusive => sorted.partition_point(|t| *t <= start.token),
    };
    if idx >= sorted.len() {
        0
    } else {
        idx
    }
}

/// Iterate the ring starting at the first token `>= start`.
pub fn ring_range(sorted: &[Token], start: Token) -> RingIter<'_> {
    RingIter::new(sorted, first_token_index(sorted, start))
}

/// Iterate the ring starting at the first token past a ring position.
pub fn ring_range_from_position(sorted: &[Token], start: RingPosition) -> RingIter<'_> {
    RingIter::new(sorted, first_token_index_for_position(sorted, start))
}

/// Greatest token strictly less than `token`, wrapping to the largest token.
pub fn predecessor(sorted: &[Token], token: Token) -> Option<Token> {
    if sorted.is_empty() {
        return None;
    }
    let idx = sorted.partition_point(|t| *t < token);
    if idx == 0 {
        sorted.last().copied()
    } else {
        Some(sorted[idx - 1])
    }
}

/// The primary range `(predecessor(token), token]`.
pub fn primary_range_for(sorted: &[Token], token: Token) -> Option<TokenRange> {
    predecessor(sorted, token).map(|left| TokenRange::new(left, token))
}

/// One primary range per token.
pub fn primary_ranges_for<I>(sorted: &[Token], tokens: I) -> Vec<TokenRange>
where
    I: IntoIterator<Item = Token>,
{
    tokens
        .into_iter()
        .filter_map(|t| primary_range_for(sorted, t))
        .collect()
}

/// Lazy circular walk over a sorted token list.
///
/// Visits every token exactly once. Cloning yields an independent iterator
/// positioned at the same place, so a range can be restarted by keeping a
/// clone of the fresh iterator.
#[derive(Debug, Clone)]
pub struct RingIter<'a> {
    sorted: &'a [Token],
    pos: usize,
    remaining: usize,
}

impl<'a> RingIter<'a> {
    fn new(sorted: &'a [Token], start: usize) -> Self {
        Self {
            sorted,
            pos: start,
            remaining: sorted.len(),
        }
    }
}

impl Iterator for RingIter<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.remaining == 0 {
            return None;
        }
        let token = self.sorted[self.pos];
        self.pos += 1;
        if self.pos == self.sorted.len() {
            self.pos = 0;
        }
        self.remaining -= 1;
        Some(token)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for RingIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(values: &[i64]) -> Vec<Token> {
        values.iter().copied().map(Token).collect()
    }

    #[test]
    fn test_ring_range_wraps() {
        let sorted = tokens(&[10, 20, 30]);
        let got: Vec<_> = ring_range(&sorted, Token(25)).collect();
        assert_eq!(got, tokens(&[30, 10, 20]));
    }

    #[test]
    fn test_ring_range_every_start_is_rotation() {
        let sorted = tokens(&[-50, -3, 0, 7, 99, 1000]);
        for start in -60..1010 {
            let got: Vec<_> = ring_range(&sorted, Token(start)).collect();
            assert_eq!(got.len(), sorted.len());
            let offset = sorted.iter().position(|t| *t == got[0]).unwrap();
            let mut rotated = sorted.clone();
            rotated.rotate_left(offset);
            assert_eq!(got, rotated, "start {}", start);
        }
    }

    #[test]
    fn test_ring_range_past_end_starts_at_smallest() {
        let sorted = tokens(&[10, 20, 30]);
        let got: Vec<_> = ring_range(&sorted, Token(31)).collect();
        assert_eq!(got, tokens(&[10, 20, 30]));
    }

    #[test]
    fn test_ring_range_restartable() {
        let sorted = tokens(&[10, 20, 30]);
        let fresh = ring_range(&sorted, Token(20));
        let first: Vec<_> = fresh.clone().collect();
        let second: Vec<_> = fresh.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_ring_range_empty() {
        assert_eq!(ring_range(&[], Token(5)).count(), 0);
        assert_eq!(first_token(&[], Token(5)), None);
    }

    #[test]
    fn test_ring_range_from_position() {
        let sorted = tokens(&[10, 20, 30]);
        let incl: Vec<_> = ring_range_from_position(&sorted, RingPosition::starting_at(Token(20))).collect();
        assert_eq!(incl, tokens(&[20, 30, 10]));

        let excl: Vec<_> = ring_range_from_position(&sorted, RingPosition::after(Token(20))).collect();
        assert_eq!(excl, tokens(&[30, 10, 20]));

        let wrap: Vec<_> = ring_range_from_position(&sorted, RingPosition::after(Token(30))).collect();
        assert_eq!(wrap, tokens(&[10, 20, 30]));
    }

    #[test]
    fn test_predecessor() {
        let sorted = tokens(&[10, 20, 30]);
        assert_eq!(predecessor(&sorted, Token(20)), Some(Token(10)));
        assert_eq!(predecessor(&sorted, Token(10)), Some(Token(30)));
        assert_eq!(predecessor(&sorted, Token(25)), Some(Token(20)));
        assert_eq!(predecessor(&[], Token(25)), None);
    }

    #[test]
    fn test_primary_ranges() {
        let sorted = tokens(&[10, 20, 30]);
        assert_eq!(
            primary_range_for(&sorted, Token(20)),
            Some(TokenRange::new(Token(10), Token(20)))
        );

        let min_range = primary_range_for(&sorted, Token(10)).unwrap();
        assert_eq!(min_range, TokenRange::new(Token(30), Token(10)));
        assert!(min_range.is_wrap_around());
        assert!(min_range.contains(Token(5)));
        assert!(min_range.contains(Token(31)));
        assert!(!min_range.contains(Token(15)));

        let all = primary_ranges_for(&sorted, tokens(&[10, 20, 30]));
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_single_token_range_covers_ring() {
        let sorted = tokens(&[42]);
        let range = primary_range_for(&sorted, Token(42)).unwrap();
        assert!(range.contains(Token::MIN));
        assert!(range.contains(Token(42)));
        assert!(range.contains(Token::MAX));
    }

    #[test]
    fn test_unwrap() {
        let plain = TokenRange::new(Token(1), Token(5));
        assert_eq!(plain.unwrap(), (plain, None));

        let (head, tail) = TokenRange::new(Token(30), Token(10)).unwrap();
        assert_eq!(head, TokenRange::new(Token(30), Token::MAX));
        let tail = tail.unwrap();
        assert!(tail.contains(Token::MIN));
        assert!(tail.contains(Token(10)));
        assert!(!tail.contains(Token(11)));
    }
}
