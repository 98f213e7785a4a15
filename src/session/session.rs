//! Long-lived per-client server-side state.
//!
//! A session outlives socket churn: the attached socket is a nullable,
//! non-owning handle cleared on close, while the QoS connection state is
//! shared with the transport for the duration of the session TTL. Only the
//! session store creates or destroys sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use super::identity::ClientIdentity;
use crate::qos::{ConnState, DuplicateFilter};
use crate::transport::SocketHandle;

// ---------------------------------------------------------------------------
// Typed fields
// ---------------------------------------------------------------------------

/// Tagged value stored in a session's field map.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Bool(bool),
    I64(i64),
    U64(u64),
    StrList(Vec<String>),
}

impl FieldValue {
    /// String form used by the secondary index: numbers in decimal, lists
    /// comma-joined.
    pub fn index_key(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::I64(n) => n.to_string(),
            Self::U64(n) => n.to_string(),
            Self::StrList(items) => items.join(","),
        }
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::U64(v)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        Self::StrList(v)
    }
}

/// Extraction of a concrete type back out of a stored field.
pub trait FromField: Sized {
    fn from_field(value: &FieldValue) -> Option<Self>;
}

impl FromField for String {
    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromField for bool {
    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromField for i64 {
    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::I64(n) => Some(*n),
            _ => None,
        }
    }
}

impl FromField for u64 {
    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::U64(n) => Some(*n),
            _ => None,
        }
    }
}

impl FromField for Vec<String> {
    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::StrList(items) => Some(items.clone()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Connection state of a session as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Online,
    Offline,
}

pub struct Session {
    identity: ClientIdentity,
    sid: String,
    conn_state: Arc<ConnState>,
    fields: RwLock<HashMap<String, FieldValue>>,
    live: Mutex<Option<SocketHandle>>,
    online: AtomicBool,
    expiry_ms: AtomicU64,
    dup_filter: Mutex<DuplicateFilter>,
}

impl Session {
    pub(crate) fn new(identity: ClientIdentity, sid: String, expiry_ms: u64) -> Self {
        Self {
            identity,
            sid,
            conn_state: Arc::new(ConnState::new()),
            fields: RwLock::new(HashMap::new()),
            live: Mutex::new(None),
            online: AtomicBool::new(false),
            expiry_ms: AtomicU64::new(expiry_ms),
            dup_filter: Mutex::new(DuplicateFilter::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.sid
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Shared QoS state; survives reconnects within the TTL.
    pub fn conn_state(&self) -> &Arc<ConnState> {
        &self.conn_state
    }

    pub fn status(&self) -> SessionStatus {
        if self.online.load(Ordering::Acquire) {
            SessionStatus::Online
        } else {
            SessionStatus::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Attaches a new socket, returning the previously attached one (to be
    /// closed by the caller through its own writer). Resets the duplicate
    /// filter because its hashes refer to the prior connection.
    pub(crate) fn rebind(&self, socket: SocketHandle) -> Option<SocketHandle> {
        *self.dup_filter.lock() = DuplicateFilter::new();
        self.online.store(true, Ordering::Release);
        self.live.lock().replace(socket)
    }

    /// Clears the live socket, but only if `conn_id` still names it; a
    /// replaced socket closing late must not detach its successor.
    pub(crate) fn unbind(&self, conn_id: u64) -> bool {
        let mut live = self.live.lock();
        match live.as_ref() {
            Some(current) if current.conn_id() == conn_id => {
                *live = None;
                self.online.store(false, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    pub fn socket(&self) -> Option<SocketHandle> {
        self.live.lock().clone()
    }

    pub fn expiry_ms(&self) -> u64 {
        self.expiry_ms.load(Ordering::Acquire)
    }

    pub(crate) fn set_expiry_ms(&self, deadline: u64) {
        self.expiry_ms.store(deadline, Ordering::Release);
    }

    /// Request-payload duplicate check; true iff the payload is fresh
    /// within the window.
    pub fn accept_request(&self, payload: &[u8], ttl: Duration) -> bool {
        self.dup_filter.lock().accept(payload, ttl, Instant::now())
    }

    pub fn get_field<T: FromField>(&self, key: &str) -> Option<T> {
        self.fields.read().get(key).and_then(T::from_field)
    }

    pub fn set_field(&self, key: &str, value: FieldValue) {
        self.fields.write().insert(key.to_string(), value);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("sid", &self.sid)
            .field("client_id", &self.identity.client_id)
            .field("device_id", &self.identity.device_id)
            .field("status", &self.status())
            .finish()
    }
}
