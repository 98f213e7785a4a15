//! Handler-facing request context.

use std::sync::Arc;

use crate::session::Session;

/// Resolves to the originating connection's send path. Implemented by the
/// transport; handlers and the dispatcher never touch a socket directly.
pub trait ReplySink: Send + Sync {
    /// Sends a payload back at the configured QoS level.
    fn reply(&self, payload: &[u8]);

    /// Asks the owning writer to close the connection.
    fn close(&self, code: u16, reason: &str);
}

/// Per-request view handed to an RPC handler.
pub struct RpcContext {
    session: Arc<Session>,
    sink: Arc<dyn ReplySink>,
}

impl RpcContext {
    pub fn new(session: Arc<Session>, sink: Arc<dyn ReplySink>) -> Self {
        Self { session, sink }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_arc(&self) -> Arc<Session> {
        self.session.clone()
    }

    /// Replies to the originating connection.
    pub fn reply(&self, payload: &[u8]) {
        self.sink.reply(payload);
    }

    /// Disconnects the originating connection.
    pub fn disconnect(&self) {
        self.sink.close(1000, "disconnected by handler");
    }

    /// Convenience check against the session's "role" field.
    pub fn has_role(&self, expected: &str) -> bool {
        self.session
            .get_field::<String>("role")
            .map_or(false, |role| role == expected)
    }
}
