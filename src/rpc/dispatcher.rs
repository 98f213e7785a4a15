//! Request dispatch: codec parse, middleware, handler lookup, worker
//! execution.
//!
//! Handlers run on the blocking worker pool behind a semaphore; a panic is
//! caught at the join boundary, logged, and answered with an Internal error
//! frame. No failure propagates past this module.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tracing::{error, warn};

use super::context::{ReplySink, RpcContext};
use super::error::{ErrorObj, RpcErr};
use super::middleware::{Middleware, MiddlewareChain, MwDecision};
use crate::codec::WireCodec;
use crate::session::Session;

/// A registered RPC handler. Runs on a worker; must not touch sockets
/// directly.
pub type RpcHandler = Arc<dyn Fn(&[u8], &mut RpcContext) + Send + Sync>;

pub struct RpcDispatcher {
    codec: Arc<dyn WireCodec>,
    chain: MiddlewareChain,
    handlers: RwLock<HashMap<String, RpcHandler>>,
    workers: Arc<Semaphore>,
}

impl RpcDispatcher {
    pub fn new(codec: Arc<dyn WireCodec>, worker_count: usize) -> Self {
        let workers = if worker_count == 0 {
            std::thread::available_parallelism().map_or(2, usize::from)
        } else {
            worker_count
        };
        Self {
            codec,
            chain: MiddlewareChain::new(),
            handlers: RwLock::new(HashMap::new()),
            workers: Arc::new(Semaphore::new(workers)),
        }
    }

    pub fn register(&self, method: &str, handler: RpcHandler) {
        self.handlers.write().insert(method.to_string(), handler);
    }

    pub fn use_middleware(&self, mw: Middleware) {
        self.chain.add(mw);
    }

    pub fn use_for(&self, method: &str, mw: Middleware) {
        self.chain.add_for(method, mw);
    }

    pub fn use_for_multi(&self, methods: &[&str], mw: Middleware) {
        self.chain.add_for_multi(methods, mw);
    }

    pub fn method_count(&self) -> usize {
        self.handlers.read().len()
    }

    fn send_error(&self, reply: &Arc<dyn ReplySink>, code: RpcErr, msg: impl Into<String>) {
        reply.reply(&self.codec.serialize_error(&ErrorObj::new(code, msg)));
    }

    /// Drives one admitted request through parse, middleware, and handler.
    pub async fn dispatch(
        self: Arc<Self>,
        data: Vec<u8>,
        session: Arc<Session>,
        reply: Arc<dyn ReplySink>,
    ) {
        let request = match self.codec.parse(&data) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "failed to parse request payload");
                self.send_error(&reply, RpcErr::Parse, "failed to parse incoming data");
                return;
            }
        };

        let mut payload = request.payload;
        match self.chain.execute(&session, &request.method, &mut payload) {
            MwDecision::Continue => {}
            MwDecision::Reject { code, reason } => {
                self.send_error(&reply, code, reason);
                return;
            }
        }

        let handler = self.handlers.read().get(&request.method).cloned();
        let Some(handler) = handler else {
            self.send_error(
                &reply,
                RpcErr::NotFound,
                format!("RPC method not found: {}", request.method),
            );
            return;
        };

        let Ok(permit) = self.workers.clone().acquire_owned().await else {
            return;
        };
        let method = request.method;
        let worker_session = session.clone();
        let worker_reply = reply.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut ctx = RpcContext::new(worker_session, worker_reply);
            handler(&payload, &mut ctx);
        })
        .await;

        if let Err(err) = joined {
            if err.is_panic() {
                error!(method, "handler panicked");
                self.send_error(&reply, RpcErr::Internal, "handler failure");
            }
        }
    }
}
