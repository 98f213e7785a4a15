//! Request-payload duplicate suppression.
//!
//! Separate from the id-based seen window: this filter operates on request
//! payload bytes, catching the case where a client retries the same request
//! across a reconnect. Frame ids are scoped to a socket, so the id window
//! cannot see that replay. The filter is reset on rebind because the old
//! hashes refer to a prior connection.

use std::collections::{HashMap, VecDeque};
use std::hash::Hasher;
use std::time::{Duration, Instant};

use twox_hash::XxHash64;

/// Memory cap on tracked payload hashes.
const WINDOW: usize = 2048;

/// Short-TTL filter over request payload hashes with FIFO eviction.
#[derive(Debug, Default)]
pub struct DuplicateFilter {
    seen: HashMap<u64, Instant>,
    order: VecDeque<u64>,
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff the payload has not been seen within `ttl`.
    ///
    /// A hit inside the window rejects; a hit past the window refreshes the
    /// entry and accepts.
    pub fn accept(&mut self, payload: &[u8], ttl: Duration, now: Instant) -> bool {
        let key = payload_hash(payload);

        while let Some(front) = self.order.front().copied() {
            let expired = self
                .seen
                .get(&front)
                .map_or(true, |seen_at| now.duration_since(*seen_at) > ttl);
            if !expired {
                break;
            }
            self.order.pop_front();
            self.seen.remove(&front);
        }

        if let Some(seen_at) = self.seen.get(&key) {
            if now.duration_since(*seen_at) <= ttl {
                return false;
            }
            self.order.retain(|h| *h != key);
        }

        if self.seen.len() >= WINDOW {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(key, now);
        self.order.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

fn payload_hash(payload: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(payload);
    hasher.finish()
}
