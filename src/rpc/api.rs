//! Framework API exposed to handler code.
//!
//! Everything here routes through the session store and the QoS engine;
//! handlers never hold sockets. Sends to offline sessions fall back to the
//! offline queue.

use std::sync::Arc;

use tracing::warn;

use crate::core::time::monotonic_millis;
use crate::qos::QosEngine;
use crate::session::{FieldValue, FromField, Session, SessionStore};

#[derive(Clone)]
pub struct FrameworkApi {
    store: Arc<SessionStore>,
    engine: QosEngine,
}

impl FrameworkApi {
    pub fn new(store: Arc<SessionStore>, engine: QosEngine) -> Self {
        Self { store, engine }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Sends to a session's live connection. False when the session is
    /// unknown or offline.
    pub fn send_to(&self, sid: &str, data: &[u8]) -> bool {
        let Some(session) = self.store.get(sid) else {
            return false;
        };
        let Some(socket) = session.socket() else {
            return false;
        };
        self.engine.send(&socket, session.conn_state(), data);
        true
    }

    /// Sends to a session, queueing offline when no socket is attached.
    /// False when the offline queue rejected the message.
    pub fn send_to_session(&self, session: &Arc<Session>, data: &[u8]) -> bool {
        match session.socket() {
            Some(socket) => {
                self.engine.send(&socket, session.conn_state(), data);
                true
            }
            None => match self
                .store
                .add_offline_message(session.id(), data.to_vec(), monotonic_millis())
            {
                Ok(()) => true,
                Err(err) => {
                    warn!(sid = session.id(), %err, "failed to queue offline message");
                    false
                }
            },
        }
    }

    /// Closes a session's live connection. False when the session is
    /// unknown or already offline.
    pub fn disconnect(&self, sid: &str) -> bool {
        let Some(session) = self.store.get(sid) else {
            return false;
        };
        let Some(socket) = session.socket() else {
            return false;
        };
        socket.request_close(1000, "disconnected by server");
        true
    }

    pub fn list_session_ids(&self) -> Vec<String> {
        self.store.list_session_ids()
    }

    /// Sessions currently bound to `(field, value)` in the secondary index.
    pub fn find_by(&self, field: &str, value: &str) -> Vec<Arc<Session>> {
        self.store.find_indexed(field, value)
    }

    pub fn set_field(
        &self,
        sid: &str,
        key: &str,
        value: impl Into<FieldValue>,
        indexed: bool,
    ) -> bool {
        self.store.set_field(sid, key, value.into(), indexed)
    }

    pub fn get_field<T: FromField>(&self, sid: &str, key: &str) -> Option<T> {
        self.store.get_field(sid, key)
    }
}
