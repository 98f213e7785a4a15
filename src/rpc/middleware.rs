//! Middleware chain.
//!
//! Global middleware runs in registration order before any per-method
//! middleware. Each step returns a decision; the first rejection stops the
//! chain and is serialized back to the caller with its error code. A
//! panicking middleware stops the chain like an explicit rejection.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::error;

use super::error::RpcErr;
use crate::session::Session;

/// Outcome of one middleware step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MwDecision {
    Continue,
    Reject { code: RpcErr, reason: String },
}

impl MwDecision {
    pub fn reject(code: RpcErr, reason: impl Into<String>) -> Self {
        Self::Reject {
            code,
            reason: reason.into(),
        }
    }
}

/// A middleware step; may rewrite the payload in place.
pub type Middleware = Arc<dyn Fn(&Arc<Session>, &str, &mut Vec<u8>) -> MwDecision + Send + Sync>;

#[derive(Default)]
pub struct MiddlewareChain {
    global: RwLock<Vec<Middleware>>,
    scoped: RwLock<HashMap<String, Vec<Middleware>>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, mw: Middleware) {
        self.global.write().push(mw);
    }

    pub fn add_for(&self, method: &str, mw: Middleware) {
        self.scoped
            .write()
            .entry(method.to_string())
            .or_default()
            .push(mw);
    }

    pub fn add_for_multi(&self, methods: &[&str], mw: Middleware) {
        for method in methods {
            self.add_for(method, mw.clone());
        }
    }

    /// Runs global then method-scoped middleware; the first rejection wins.
    pub fn execute(
        &self,
        session: &Arc<Session>,
        method: &str,
        payload: &mut Vec<u8>,
    ) -> MwDecision {
        let chain: Vec<Middleware> = {
            let global = self.global.read();
            let scoped = self.scoped.read();
            global
                .iter()
                .chain(scoped.get(method).into_iter().flatten())
                .cloned()
                .collect()
        };
        for mw in chain {
            let outcome = catch_unwind(AssertUnwindSafe(|| mw(session, method, payload)));
            match outcome {
                Ok(MwDecision::Continue) => {}
                Ok(reject) => return reject,
                Err(_) => {
                    error!(method, "middleware panicked; stopping chain");
                    return MwDecision::reject(RpcErr::Middleware, "middleware failure");
                }
            }
        }
        MwDecision::Continue
    }
}

// ---------------------------------------------------------------------------
// Stock middleware
// ---------------------------------------------------------------------------

/// Token-bucket rate limiter keyed by session id.
///
/// `qps` tokens refill per second up to `burst`; an empty bucket rejects
/// with `RateLimited`.
pub fn rate_limiter(qps: u32, burst: u32) -> Middleware {
    struct Bucket {
        tokens: f64,
        last: Instant,
    }
    let buckets: Mutex<HashMap<String, Bucket>> = Mutex::new(HashMap::new());
    Arc::new(move |session, _method, _payload| {
        let mut buckets = buckets.lock();
        let bucket = buckets.entry(session.id().to_string()).or_insert(Bucket {
            tokens: f64::from(burst),
            last: Instant::now(),
        });
        let now = Instant::now();
        let refill = now.duration_since(bucket.last).as_secs_f64() * f64::from(qps);
        bucket.tokens = (bucket.tokens + refill).min(f64::from(burst));
        bucket.last = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            MwDecision::Continue
        } else {
            MwDecision::reject(RpcErr::RateLimited, "rate limit exceeded")
        }
    })
}
