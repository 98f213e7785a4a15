//! Per-connection QoS state.
//!
//! The record outlives socket churn: it is owned by the session and shared
//! with whichever socket is currently attached, so pending tables survive a
//! reconnect and the retry scheduler resends on the new socket
//! automatically.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;

/// Hard cap on the seen-id window, on top of the TTL.
const SEEN_CAP: usize = 65_536;

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// An outstanding QoS-1 DATA frame awaiting ACK.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    pub frame: Bytes,
    pub retry_count: u32,
    pub next_retry: Instant,
}

/// Stages of the QoS-2 two-phase handshake, sender side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos2Stage {
    /// Awaiting PREPARE_ACK; PREPARE is resent periodically.
    Prepare,
    /// Awaiting COMPLETE; COMMIT is resent periodically.
    Commit,
}

/// An outstanding QoS-2 control frame with its retry bookkeeping.
#[derive(Debug, Clone)]
pub struct Qos2Pending {
    pub stage: Qos2Stage,
    pub frame: Bytes,
    pub retry_count: u32,
    pub next_retry: Instant,
    pub last_touched: Instant,
}

// ---------------------------------------------------------------------------
// Seen-id window
// ---------------------------------------------------------------------------

/// Bounded set of recently received ids with insertion timestamps.
///
/// Entries strictly younger than the TTL remain in the set; older entries
/// are purged lazily on insertion.
#[derive(Debug, Default)]
pub struct SeenWindow {
    set: HashSet<u64>,
    order: VecDeque<(u64, Instant)>,
}

impl SeenWindow {
    /// Registers an id. Returns true if it was fresh.
    pub fn register(&mut self, id: u64, ttl: Duration, now: Instant) -> bool {
        while let Some((front, seen_at)) = self.order.front().copied() {
            let expired = now.duration_since(seen_at) > ttl;
            if !expired && self.order.len() < SEEN_CAP {
                break;
            }
            self.order.pop_front();
            self.set.remove(&front);
        }
        let fresh = self.set.insert(id);
        if fresh {
            self.order.push_back((id, now));
        }
        fresh
    }

    pub fn contains(&self, id: u64) -> bool {
        self.set.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn clear(&mut self) {
        self.set.clear();
        self.order.clear();
    }
}

// ---------------------------------------------------------------------------
// Lock-partitioned tables
// ---------------------------------------------------------------------------

/// QoS-1 tables plus the seen window, guarded together.
#[derive(Debug, Default)]
pub struct Qos1Tables {
    /// id -> outstanding DATA frame awaiting ACK.
    pub pending: HashMap<u64, PendingFrame>,
    /// Recently received ids, for duplicate rejection.
    pub seen: SeenWindow,
}

/// QoS-2 tables, guarded independently of the QoS-1 side so ACK processing
/// does not contend with QoS-2 retries.
#[derive(Debug, Default)]
pub struct Qos2Tables {
    /// id -> outstanding PREPARE/COMMIT with retry state.
    pub pending: HashMap<u64, Qos2Pending>,
    /// id -> payload parked until the peer's PREPARE_ACK.
    pub pub_prepare: HashMap<u64, Vec<u8>>,
    /// id -> payload released as DATA once COMPLETE arrives.
    pub pending_resp: HashMap<u64, Vec<u8>>,
    /// Receiver side: ids announced by the peer's PREPARE, awaiting COMMIT.
    pub recv_prepare: HashSet<u64>,
}

/// Shared per-connection state: outbound id allocator and the two QoS table
/// groups under their own locks.
#[derive(Debug)]
pub struct ConnState {
    next_id: AtomicU64,
    pub qos1: RwLock<Qos1Tables>,
    pub qos2: RwLock<Qos2Tables>,
}

impl Default for ConnState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnState {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            qos1: RwLock::new(Qos1Tables::default()),
            qos2: RwLock::new(Qos2Tables::default()),
        }
    }

    /// Allocates the next outbound message id. Never repeats within the
    /// session lifetime.
    pub fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Count of in-flight QoS-1 frames.
    pub fn pending1_len(&self) -> usize {
        self.qos1.read().pending.len()
    }

    /// Count of in-flight QoS-2 handshakes.
    pub fn pending2_len(&self) -> usize {
        self.qos2.read().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_increase() {
        let state = ConnState::new();
        assert_eq!(state.alloc_id(), 1);
        assert_eq!(state.alloc_id(), 2);
        assert_eq!(state.alloc_id(), 3);
    }

    #[test]
    fn seen_window_expires_by_ttl() {
        let mut window = SeenWindow::default();
        let ttl = Duration::from_millis(100);
        let now = Instant::now();
        assert!(window.register(1, ttl, now));
        assert!(!window.register(1, ttl, now + Duration::from_millis(50)));
        // Past the TTL the id is purged and registers as fresh again.
        assert!(window.register(1, ttl, now + Duration::from_millis(200)));
    }

    #[test]
    fn seen_window_tracks_multiple_ids() {
        let mut window = SeenWindow::default();
        let ttl = Duration::from_secs(5);
        let now = Instant::now();
        for id in 0..100u64 {
            assert!(window.register(id, ttl, now));
        }
        assert_eq!(window.len(), 100);
        assert!(window.contains(42));
    }
}
