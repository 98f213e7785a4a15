//! Session store: the single owner of session lifecycle.
//!
//! Three indices stay in sync under one writer lock: `sid -> session`,
//! `identity -> session`, and the generic secondary index. The offline
//! mailbox hangs off the store under its own mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::identity::ClientIdentity;
use super::index::GenericIndex;
use super::offline::{OfflineError, OfflineLimits, OfflineMailbox};
use super::session::{FieldValue, FromField, Session};

#[derive(Default)]
struct Indices {
    by_sid: HashMap<String, Arc<Session>>,
    by_identity: HashMap<ClientIdentity, Arc<Session>>,
}

pub struct SessionStore {
    ttl_ms: u64,
    offline_limits: OfflineLimits,
    next_sid: AtomicU64,
    indices: RwLock<Indices>,
    index: GenericIndex,
    mailbox: Mutex<OfflineMailbox>,
}

impl SessionStore {
    pub fn new(ttl_ms: u64, offline_limits: OfflineLimits) -> Self {
        Self {
            ttl_ms,
            offline_limits,
            next_sid: AtomicU64::new(1),
            indices: RwLock::new(Indices::default()),
            index: GenericIndex::new(),
            mailbox: Mutex::new(OfflineMailbox::default()),
        }
    }

    pub fn session_ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    fn make_sid(&self) -> String {
        format!("S{}", self.next_sid.fetch_add(1, Ordering::Relaxed))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Creates a session unconditionally, minting a token when the identity
    /// carries none, and installs it into all indices.
    pub fn create_session(&self, mut identity: ClientIdentity, now_ms: u64) -> Arc<Session> {
        if !identity.has_token() {
            identity.mint_token();
        }
        let sid = self.make_sid();
        let session = Arc::new(Session::new(
            identity.clone(),
            sid.clone(),
            now_ms + self.ttl_ms,
        ));
        let mut indices = self.indices.write();
        indices.by_identity.insert(identity, session.clone());
        indices.by_sid.insert(sid, session.clone());
        session
    }

    /// Resolves a handshake identity to a session.
    ///
    /// No token always creates. A matching unexpired session with a
    /// byte-identical token reattaches (same pending tables, same fields)
    /// and refreshes expiry. A token mismatch is treated as a spoof and a
    /// fresh session is created; the old one stays reachable by id until
    /// its TTL runs out.
    pub fn get_or_create(&self, identity: ClientIdentity, now_ms: u64) -> Arc<Session> {
        if !identity.has_token() {
            return self.create_session(identity, now_ms);
        }
        {
            let indices = self.indices.read();
            if let Some(existing) = indices.by_identity.get(&identity) {
                let expired = existing.expiry_ms() != 0 && now_ms > existing.expiry_ms();
                if !expired && existing.identity().token == identity.token {
                    existing.set_expiry_ms(now_ms + self.ttl_ms);
                    debug!(sid = existing.id(), "reattaching to existing session");
                    return existing.clone();
                }
                debug!(
                    sid = existing.id(),
                    expired, "token mismatch or expiry; creating fresh session"
                );
            }
        }
        self.create_session(identity, now_ms)
    }

    pub fn get(&self, sid: &str) -> Option<Arc<Session>> {
        self.indices.read().by_sid.get(sid).cloned()
    }

    /// Purges a session from every index and drops its offline backlog.
    pub fn remove_session(&self, sid: &str) {
        let mut indices = self.indices.write();
        if let Some(session) = indices.by_sid.remove(sid) {
            // Only drop the identity entry if it still points at this
            // session; a newer session may have displaced it.
            let owns_identity = indices
                .by_identity
                .get(session.identity())
                .map_or(false, |current| Arc::ptr_eq(current, &session));
            if owns_identity {
                indices.by_identity.remove(session.identity());
            }
        }
        drop(indices);
        self.index.remove(sid);
        self.mailbox.lock().remove(sid);
    }

    /// Removes every offline session past its expiry deadline. Returns the
    /// number of sessions reaped.
    pub fn reap(&self, now_ms: u64) -> usize {
        let expired: Vec<String> = {
            let indices = self.indices.read();
            indices
                .by_sid
                .values()
                .filter(|s| !s.is_online() && self.ttl_ms != 0 && s.expiry_ms() < now_ms)
                .map(|s| s.id().to_string())
                .collect()
        };
        for sid in &expired {
            debug!(sid, "session expired");
            self.remove_session(sid);
        }
        expired.len()
    }

    pub fn list_session_ids(&self) -> Vec<String> {
        self.indices.read().by_sid.keys().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.indices.read().by_sid.len()
    }

    // -----------------------------------------------------------------------
    // Fields & index
    // -----------------------------------------------------------------------

    /// Updates a typed field; when `indexed`, mirrors the value into the
    /// secondary index under its string form.
    pub fn set_field(&self, sid: &str, key: &str, value: FieldValue, indexed: bool) -> bool {
        let Some(session) = self.get(sid) else {
            return false;
        };
        if indexed {
            self.index.add(sid, key, &value.index_key());
        }
        session.set_field(key, value);
        true
    }

    pub fn get_field<T: FromField>(&self, sid: &str, key: &str) -> Option<T> {
        self.get(sid)?.get_field(key)
    }

    /// O(1) secondary-index lookup.
    pub fn find_indexed(&self, field: &str, value: &str) -> Vec<Arc<Session>> {
        let sids = self.index.find(field, value);
        let indices = self.indices.read();
        sids.iter()
            .filter_map(|sid| indices.by_sid.get(sid).cloned())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Offline queue
    // -----------------------------------------------------------------------

    /// Queues a message for a disconnected session, subject to the
    /// per-session and global caps.
    pub fn add_offline_message(
        &self,
        sid: &str,
        data: Vec<u8>,
        now_ms: u64,
    ) -> Result<(), OfflineError> {
        self.mailbox
            .lock()
            .push(sid, data, now_ms, &self.offline_limits)
    }

    /// Pops all queued messages FIFO and hands each to `send`.
    pub fn drain_offline(&self, sid: &str, mut send: impl FnMut(Vec<u8>)) -> usize {
        let drained = self.mailbox.lock().drain(sid);
        let count = drained.len();
        for message in drained {
            send(message);
        }
        count
    }

    pub fn offline_backlog(&self, sid: &str) -> usize {
        self.mailbox.lock().queued_for(sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(60_000, OfflineLimits::default())
    }

    #[test]
    fn tokenless_handshake_always_creates() {
        let store = store();
        let first = store.get_or_create(ClientIdentity::new("u", 1), 0);
        let second = store.get_or_create(ClientIdentity::new("u", 1), 0);
        assert_ne!(first.id(), second.id());
        assert!(first.identity().has_token());
    }

    #[test]
    fn matching_token_reattaches_and_refreshes_expiry() {
        let store = store();
        let session = store.get_or_create(ClientIdentity::new("u", 1), 0);
        let token = session.identity().token;
        let again = store.get_or_create(ClientIdentity::with_token("u", 1, token), 10_000);
        assert_eq!(session.id(), again.id());
        assert_eq!(again.expiry_ms(), 70_000);
    }

    #[test]
    fn token_mismatch_creates_fresh_but_keeps_old_by_id() {
        let store = store();
        let session = store.get_or_create(ClientIdentity::new("u", 1), 0);
        let spoofed = store.get_or_create(ClientIdentity::with_token("u", 1, [0xAA; 16]), 0);
        assert_ne!(session.id(), spoofed.id());
        assert!(store.get(session.id()).is_some());
    }

    #[test]
    fn expired_session_not_reused() {
        let store = store();
        let session = store.get_or_create(ClientIdentity::new("u", 1), 0);
        let token = session.identity().token;
        let late = store.get_or_create(ClientIdentity::with_token("u", 1, token), 120_000);
        assert_ne!(session.id(), late.id());
    }

    #[test]
    fn reap_removes_expired_offline_sessions() {
        let store = store();
        let session = store.get_or_create(ClientIdentity::new("u", 1), 0);
        let sid = session.id().to_string();
        assert_eq!(store.reap(30_000), 0);
        assert_eq!(store.reap(61_000), 1);
        assert!(store.get(&sid).is_none());
    }

    #[test]
    fn indexed_field_rewrite_moves_bucket() {
        let store = store();
        let session = store.get_or_create(ClientIdentity::new("u", 1), 0);
        let sid = session.id().to_string();
        assert!(store.set_field(&sid, "room", FieldValue::from("lobby"), true));
        assert!(store.set_field(&sid, "room", FieldValue::from("arena"), true));
        assert!(store.find_indexed("room", "lobby").is_empty());
        let found = store.find_indexed("room", "arena");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), sid);
        assert_eq!(
            store.get_field::<String>(&sid, "room"),
            Some("arena".into())
        );
    }

    #[test]
    fn remove_session_clears_offline_and_index() {
        let store = store();
        let session = store.get_or_create(ClientIdentity::new("u", 1), 0);
        let sid = session.id().to_string();
        store.set_field(&sid, "team", FieldValue::from("red"), true);
        store.add_offline_message(&sid, vec![1], 0).unwrap();
        store.remove_session(&sid);
        assert!(store.get(&sid).is_none());
        assert!(store.find_indexed("team", "red").is_empty());
        assert_eq!(store.offline_backlog(&sid), 0);
    }
}
