//! Per-token KV cache slots as seen by backends.
//!
//! The engine owns the cache; a backend only ever receives a read-only
//! [`CacheView`] of the committed history plus the entries it is asked to
//! evaluate next. `position` is the absolute sequence position of a slot and
//! keeps increasing across evictions, so a backend can tell which of its own
//! attention rows have aged out of the window.

use serde::{Deserialize, Serialize};

use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub token: Token,
    pub position: u64,
}

impl CacheEntry {
    #[inline]
    pub fn new(token: Token, position: u64) -> Self {
        Self { token, position }
    }
}

/// Borrowed, possibly non-contiguous window over committed cache entries
/// (a ring buffer exposes itself as two slices).
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheView<'a> {
    head: &'a [CacheEntry],
    tail: &'a [CacheEntry],
}

impl<'a> CacheView<'a> {
    pub fn new(head: &'a [CacheEntry], tail: &'a [CacheEntry]) -> Self {
        Self { head, tail }
    }

    pub fn from_slice(entries: &'a [CacheEntry]) -> Self {
        Self {
            head: entries,
            tail: &[],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the first `n` entries from the view (saturating).
    pub fn skip(self, n: usize) -> Self {
        if n >= self.len() {
            return Self::default();
        }
        if n < self.head.len() {
            Self {
                head: &self.head[n..],
                tail: self.tail,
            }
        } else {
            Self {
                head: &self.tail[n - self.head.len()..],
                tail: &[],
            }
        }
    }

    pub fn get(&self, i: usize) -> Option<&'a CacheEntry> {
        if i < self.head.len() {
            self.head.get(i)
        } else {
            self.tail.get(i - self.head.len())
        }
    }

    pub fn first(&self) -> Option<&'a CacheEntry> {
        self.get(0)
    }

    pub fn last(&self) -> Option<&'a CacheEntry> {
        self.tail.last().or_else(|| self.head.last())
    }

    pub fn iter(self) -> impl DoubleEndedIterator<Item = &'a CacheEntry> + 'a {
        let (head, tail) = (self.head, self.tail);
        head.iter().chain(tail.iter())
    }

    pub fn tokens(&self) -> Vec<Token> {
        self.iter().map(|e| e.token).collect()
    }
}
