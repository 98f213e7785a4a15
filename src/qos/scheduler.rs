//! Retry scheduler.
//!
//! A single cooperative task beside the I/O tasks: every tick it re-drives
//! due QoS-1 and QoS-2 frames across all active connections and reaps
//! expired offline sessions. Sends go through each connection's
//! [`FrameSink`], so socket I/O stays on the owning writer; the snapshot of
//! targets is taken up front so no global lock is held across a send.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::conn_state::ConnState;
use super::engine::FrameSink;
use super::ReliableOptions;
use crate::core::time::Clock;
use crate::session::store::SessionStore;

/// Cycle period between retry sweeps.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// One connection as seen by the scheduler.
#[derive(Clone)]
pub struct RetryTarget {
    pub state: Arc<ConnState>,
    pub sink: Arc<dyn FrameSink>,
}

/// Provider of the current active-connection snapshot.
pub type TargetSource = Arc<dyn Fn() -> Vec<RetryTarget> + Send + Sync>;

pub struct RetryScheduler<C: Clock> {
    targets: TargetSource,
    store: Arc<SessionStore>,
    opts: Arc<ReliableOptions>,
    clock: C,
}

impl<C: Clock> RetryScheduler<C> {
    pub fn new(
        targets: TargetSource,
        store: Arc<SessionStore>,
        opts: Arc<ReliableOptions>,
        clock: C,
    ) -> Self {
        Self {
            targets,
            store,
            opts,
            clock,
        }
    }

    /// Runs the scheduler until the shutdown flag flips; exits within one
    /// tick of being asked to stop.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(TICK_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        self.run_once(self.clock.now());
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("retry scheduler stopped");
        })
    }

    /// One sweep: resend due frames, evict exhausted ids, reap sessions.
    pub fn run_once(&self, now: Instant) {
        let targets = (self.targets)();
        for target in &targets {
            self.retry_qos1(target, now);
            self.retry_qos2(target, now);
        }
        let reaped = self.store.reap(self.clock.now_millis());
        if reaped > 0 {
            debug!(reaped, "reaped expired sessions");
        }
    }

    fn retry_qos1(&self, target: &RetryTarget, now: Instant) {
        let mut resend = Vec::new();
        {
            let mut q1 = target.state.qos1.write();
            q1.pending.retain(|id, entry| {
                if now < entry.next_retry {
                    return true;
                }
                if self.opts.max_retry > 0 && entry.retry_count >= self.opts.max_retry {
                    warn!(id, "QoS-1 retries exhausted; dropping");
                    return false;
                }
                entry.retry_count += 1;
                entry.next_retry = now + self.opts.backoff.next_delay(entry.retry_count);
                resend.push((*id, entry.frame.clone()));
                true
            });
        }
        for (id, frame) in resend {
            if target.sink.send_frame(frame) {
                debug!(id, "resent QoS-1 frame");
            }
        }
    }

    fn retry_qos2(&self, target: &RetryTarget, now: Instant) {
        let mut resend = Vec::new();
        {
            let mut q2 = target.state.qos2.write();
            let mut evicted = Vec::new();
            q2.pending.retain(|id, entry| {
                if now < entry.next_retry {
                    return true;
                }
                if self.opts.max_retry > 0 && entry.retry_count >= self.opts.max_retry {
                    warn!(id, stage = ?entry.stage, "QoS-2 retries exhausted; dropping");
                    evicted.push(*id);
                    return false;
                }
                entry.retry_count += 1;
                entry.last_touched = now;
                entry.next_retry = now + self.opts.backoff.next_delay(entry.retry_count);
                resend.push((*id, entry.frame.clone()));
                true
            });
            for id in evicted {
                q2.pub_prepare.remove(&id);
                q2.pending_resp.remove(&id);
            }
        }
        for (id, frame) in resend {
            if target.sink.send_frame(frame) {
                debug!(id, "resent QoS-2 control frame");
            }
        }
    }
}
