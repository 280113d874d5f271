//! Bounded, append-only log of per-token cache entries plus message-boundary markers.
//!
//! Invariants held after every public call:
//! - `len() <= capacity()`
//! - every boundary index is in `[0, len())`
//!
//! Boundaries are stored by absolute position, so eviction only has to drop the
//! ones that fell off the front; the relative indices shift on their own.

use std::collections::{BTreeSet, VecDeque};
use std::str::FromStr;

use lumen_abi::{CacheEntry, CacheView, Token};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// What to forget when the cache is full and a new entry arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Drop exactly one oldest entry.
    #[default]
    Fifo,
    /// Drop the oldest whole turn (through the oldest boundary) as long as that
    /// boundary is not the most recent one; otherwise behave like `Fifo`.
    BoundaryAware,
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(EvictionPolicy::Fifo),
            "boundary_aware" | "boundary-aware" => Ok(EvictionPolicy::BoundaryAware),
            other => Err(format!("unknown eviction policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KvCache {
    capacity: usize,
    policy: EvictionPolicy,
    entries: VecDeque<CacheEntry>,
    /// Absolute positions of entries that close a conversational turn.
    boundaries: BTreeSet<u64>,
    next_position: u64,
    evicted_total: u64,
}

impl KvCache {
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            policy,
            entries: VecDeque::with_capacity(capacity.min(1 << 16)),
            boundaries: BTreeSet::new(),
            next_position: 0,
            evicted_total: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    #[inline]
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Fraction of capacity in use, 0.0..=1.0.
    pub fn occupancy(&self) -> f32 {
        self.entries.len() as f32 / self.capacity as f32
    }

    /// Absolute position the next appended entry will receive.
    #[inline]
    pub fn next_position(&self) -> u64 {
        self.next_position
    }

    /// Entries dropped by eviction since creation (not reset by `clear`).
    #[inline]
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    pub fn view(&self) -> CacheView<'_> {
        let (head, tail) = self.entries.as_slices();
        CacheView::new(head, tail)
    }

    pub fn tokens(&self) -> Vec<Token> {
        self.entries.iter().map(|e| e.token).collect()
    }

    /// Boundary markers as indices into the current entries, ascending.
    pub fn boundaries(&self) -> Vec<usize> {
        let front = self.front_position();
        self.boundaries
            .iter()
            .map(|&p| (p - front) as usize)
            .collect()
    }

    /// Build entries for `tokens` positioned right after the current tail.
    pub fn stage(&self, tokens: &[Token]) -> Vec<CacheEntry> {
        tokens
            .iter()
            .enumerate()
            .map(|(i, &t)| CacheEntry::new(t, self.next_position + i as u64))
            .collect()
    }

    /// Append one token at the tail. Returns how many entries were evicted.
    pub fn append_token(&mut self, token: Token) -> usize {
        let entry = CacheEntry::new(token, self.next_position);
        self.append(entry)
    }

    /// Append one entry, evicting first if the cache is full. The new entry is never evicted.
    pub fn append(&mut self, entry: CacheEntry) -> usize {
        let evicted = if self.is_full() { self.evict_one_round() } else { 0 };
        self.next_position = self.next_position.max(entry.position + 1);
        self.entries.push_back(entry);
        evicted
    }

    /// Append a batch of entries produced by `stage`. Returns the total evicted.
    pub fn commit(&mut self, pending: &[CacheEntry]) -> usize {
        pending.iter().map(|e| self.append(*e)).sum()
    }

    /// How many of the current entries would be evicted by committing `incoming` entries.
    /// Lets callers present the backend with exactly the window that will survive.
    pub fn evictions_for(&self, incoming: usize) -> usize {
        let boundaries: Vec<usize> = self.boundaries();
        let mut front = 0usize; // index into (entries ++ incoming)
        let mut end = self.len();
        let mut next_boundary = 0usize;

        for _ in 0..incoming {
            if end - front >= self.capacity {
                while next_boundary < boundaries.len() && boundaries[next_boundary] < front {
                    next_boundary += 1;
                }
                let live = boundaries.len() - next_boundary;
                let drop = match self.policy {
                    EvictionPolicy::BoundaryAware if live > 1 => {
                        boundaries[next_boundary] + 1 - front
                    }
                    _ => 1,
                };
                front += drop;
            }
            end += 1;
        }
        front.min(self.len())
    }

    /// Forget every entry and boundary. Capacity is a model property and stays.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.boundaries.clear();
    }

    /// Mark the current last entry as the end of a turn. No-op on an empty cache.
    pub fn mark_boundary(&mut self) -> bool {
        match self.entries.back() {
            Some(last) => self.boundaries.insert(last.position),
            None => false,
        }
    }

    #[inline]
    fn front_position(&self) -> u64 {
        self.entries
            .front()
            .map(|e| e.position)
            .unwrap_or(self.next_position)
    }

    fn evict_one_round(&mut self) -> usize {
        let through = match self.policy {
            EvictionPolicy::BoundaryAware if self.boundaries.len() > 1 => {
                self.boundaries.first().copied()
            }
            _ => None,
        };

        let mut evicted = 0usize;
        match through {
            Some(pos) => {
                while self.entries.front().is_some_and(|e| e.position <= pos) {
                    self.entries.pop_front();
                    evicted += 1;
                }
            }
            None => {
                if self.entries.pop_front().is_some() {
                    evicted = 1;
                }
            }
        }

        let front = self.front_position();
        self.boundaries = self.boundaries.split_off(&front);
        self.evicted_total += evicted as u64;
        trace!(evicted, len = self.entries.len(), "kv eviction");
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, policy: EvictionPolicy, n: i32) -> KvCache {
        let mut kv = KvCache::new(capacity, policy);
        for t in 0..n {
            kv.append_token(Token(t));
        }
        kv
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let mut kv = KvCache::new(8, EvictionPolicy::Fifo);
        for t in 0..100 {
            kv.append_token(Token(t));
            assert!(kv.len() <= kv.capacity());
        }
        assert_eq!(kv.len(), 8);
    }

    #[test]
    fn full_cache_evicts_exactly_one_oldest() {
        let mut kv = filled(8, EvictionPolicy::Fifo, 8);
        assert!(kv.is_full());
        let evicted = kv.append_token(Token(99));
        assert_eq!(evicted, 1);
        assert_eq!(kv.len(), 8);
        assert_eq!(kv.tokens().first(), Some(&Token(1)));
        assert_eq!(kv.tokens().last(), Some(&Token(99)));
    }

    #[test]
    fn ten_appends_into_eight_slots_keep_the_newest() {
        let kv = filled(8, EvictionPolicy::Fifo, 10);
        assert_eq!(kv.len(), 8);
        assert_eq!(kv.capacity(), 8);
        assert_eq!(kv.tokens(), (2..10).map(Token).collect::<Vec<_>>());
        assert_eq!(kv.evicted_total(), 2);
    }

    #[test]
    fn clear_empties_entries_and_boundaries_but_keeps_capacity() {
        let mut kv = filled(16, EvictionPolicy::Fifo, 5);
        kv.mark_boundary();
        assert_eq!(kv.boundaries(), vec![4]);
        kv.clear();
        assert_eq!(kv.len(), 0);
        assert!(kv.boundaries().is_empty());
        assert_eq!(kv.capacity(), 16);
    }

    #[test]
    fn mark_on_empty_cache_is_noop_and_duplicates_collapse() {
        let mut kv = KvCache::new(4, EvictionPolicy::Fifo);
        assert!(!kv.mark_boundary());
        kv.append_token(Token(1));
        assert!(kv.mark_boundary());
        assert!(!kv.mark_boundary());
        assert_eq!(kv.boundaries(), vec![0]);
    }

    #[test]
    fn fifo_eviction_shifts_and_drops_boundaries() {
        let mut kv = filled(4, EvictionPolicy::Fifo, 2);
        kv.mark_boundary(); // index 1
        kv.append_token(Token(2));
        kv.append_token(Token(3));
        kv.mark_boundary(); // index 3
        assert_eq!(kv.boundaries(), vec![1, 3]);

        kv.append_token(Token(4)); // evicts token 0
        assert_eq!(kv.boundaries(), vec![0, 2]);
        kv.append_token(Token(5)); // evicts token 1, first boundary falls off
        assert_eq!(kv.boundaries(), vec![1]);
        for b in kv.boundaries() {
            assert!(b < kv.len());
        }
    }

    #[test]
    fn boundary_aware_drops_oldest_turn_whole() {
        let mut kv = KvCache::new(6, EvictionPolicy::BoundaryAware);
        for t in 0..3 {
            kv.append_token(Token(t));
        }
        kv.mark_boundary(); // turn one ends at index 2
        for t in 3..6 {
            kv.append_token(Token(t));
        }
        kv.mark_boundary(); // turn two ends at index 5

        let evicted = kv.append_token(Token(6));
        assert_eq!(evicted, 3);
        assert_eq!(kv.tokens(), vec![Token(3), Token(4), Token(5), Token(6)]);
        assert_eq!(kv.boundaries(), vec![2]);
    }

    #[test]
    fn boundary_aware_falls_back_to_fifo_with_single_boundary() {
        let mut kv = KvCache::new(3, EvictionPolicy::BoundaryAware);
        for t in 0..3 {
            kv.append_token(Token(t));
        }
        kv.mark_boundary();
        assert_eq!(kv.append_token(Token(3)), 1);
        assert_eq!(kv.tokens(), vec![Token(1), Token(2), Token(3)]);
    }

    #[test]
    fn evictions_for_matches_commit() {
        for policy in [EvictionPolicy::Fifo, EvictionPolicy::BoundaryAware] {
            let mut kv = KvCache::new(6, policy);
            for t in 0..3 {
                kv.append_token(Token(t));
            }
            kv.mark_boundary();
            for t in 3..5 {
                kv.append_token(Token(t));
            }
            kv.mark_boundary();

            for incoming in 0..=6 {
                let predicted = kv.evictions_for(incoming);
                let mut trial = kv.clone();
                let pending = trial.stage(&vec![Token(42); incoming]);
                let before = trial.len();
                trial.commit(&pending);
                let survivors_from_history = trial
                    .view()
                    .iter()
                    .filter(|e| e.position < kv.next_position())
                    .count();
                assert_eq!(
                    before - predicted,
                    survivors_from_history,
                    "policy {policy:?}, incoming {incoming}"
                );
            }
        }
    }

    #[test]
    fn positions_keep_increasing_across_clear() {
        let mut kv = filled(4, EvictionPolicy::Fifo, 3);
        kv.clear();
        kv.append_token(Token(7));
        assert_eq!(kv.view().first().map(|e| e.position), Some(3));
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!("FIFO".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Fifo));
        assert_eq!(
            "boundary-aware".parse::<EvictionPolicy>(),
            Ok(EvictionPolicy::BoundaryAware)
        );
        assert!("lru".parse::<EvictionPolicy>().is_err());
    }
}
