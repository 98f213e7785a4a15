//! QoS state machine transitions.
//!
//! The engine owns no sockets and no tasks. Outbound paths allocate ids,
//! record retry state, and hand encoded frames to a [`FrameSink`]; inbound
//! paths advance the per-connection tables and tell the caller whether a
//! payload should reach dispatch. All socket I/O stays behind the sink,
//! which queues onto the owning connection's writer.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

use super::conn_state::{ConnState, PendingFrame, Qos2Pending, Qos2Stage, Qos2Tables};
use super::{QosLevel, ReliableOptions};
use crate::wire::frame::{self, FrameType};

/// Non-blocking handoff to a connection's writer.
///
/// Returns false when the connection refused the frame (closed, or the send
/// queue overflowed and the connection is being torn down).
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: Bytes) -> bool;
}

/// Outcome of feeding one inbound wire frame through the state machines.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Application payload admitted past the id window; hand to dispatch.
    Deliver(Vec<u8>),
    /// Control frame consumed by the state machines.
    Handled,
    /// Malformed or duplicate frame; nothing to do.
    Dropped,
}

/// Stateless driver over shared [`ConnState`]; cheap to clone.
#[derive(Clone)]
pub struct QosEngine {
    opts: Arc<ReliableOptions>,
}

impl QosEngine {
    pub fn new(opts: Arc<ReliableOptions>) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &ReliableOptions {
        &self.opts
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Sends an application payload at the configured QoS level. Returns the
    /// allocated message id.
    pub fn send(&self, sink: &dyn FrameSink, state: &ConnState, payload: &[u8]) -> u64 {
        let now = Instant::now();
        match self.opts.level {
            QosLevel::None => self.send_qos0(sink, state, payload),
            QosLevel::AtLeastOnce => self.send_qos1(sink, state, payload, now),
            QosLevel::ExactlyOnce => self.send_qos2(sink, state, payload, now),
        }
    }

    fn send_qos0(&self, sink: &dyn FrameSink, state: &ConnState, payload: &[u8]) -> u64 {
        let id = state.alloc_id();
        sink.send_frame(frame::encode(FrameType::Data, id, payload));
        id
    }

    fn send_qos1(
        &self,
        sink: &dyn FrameSink,
        state: &ConnState,
        payload: &[u8],
        now: Instant,
    ) -> u64 {
        let id = state.alloc_id();
        let encoded = frame::encode(FrameType::Data, id, payload);
        {
            let mut q1 = state.qos1.write();
            q1.pending.insert(
                id,
                PendingFrame {
                    frame: encoded.clone(),
                    retry_count: 0,
                    next_retry: now + self.opts.backoff.next_delay(1),
                },
            );
        }
        if !sink.send_frame(encoded) {
            debug!(id, "initial QoS-1 send refused; retry scheduler will re-drive");
        }
        id
    }

    fn send_qos2(
        &self,
        sink: &dyn FrameSink,
        state: &ConnState,
        payload: &[u8],
        now: Instant,
    ) -> u64 {
        let id = state.alloc_id();
        let prepare = frame::encode(FrameType::Prepare, id, &[]);
        {
            let mut q2 = state.qos2.write();
            if q2.pending.contains_key(&id)
                || q2.pub_prepare.contains_key(&id)
                || q2.pending_resp.contains_key(&id)
            {
                warn!(id, "id already in QoS-2 pipeline; skipping");
                return id;
            }
            q2.pub_prepare.insert(id, payload.to_vec());
            q2.pending.insert(
                id,
                Qos2Pending {
                    stage: Qos2Stage::Prepare,
                    frame: prepare.clone(),
                    retry_count: 0,
                    next_retry: now + self.opts.backoff.next_delay(1),
                    last_touched: now,
                },
            );
        }
        if !sink.send_frame(prepare) {
            debug!(id, "initial PREPARE refused; retry scheduler will re-drive");
        }
        id
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Advances the state machines for one raw inbound frame.
    pub fn on_frame(&self, sink: &dyn FrameSink, state: &ConnState, raw: &[u8]) -> Inbound {
        let decoded = match frame::decode(raw) {
            Ok(f) => f,
            Err(err) => {
                warn!(%err, "dropping malformed frame");
                return Inbound::Dropped;
            }
        };
        let now = Instant::now();
        match decoded.frame_type {
            FrameType::Data => self.on_data(sink, state, decoded.id, decoded.payload, now),
            FrameType::Ack => self.on_ack(state, decoded.id),
            FrameType::Prepare => self.on_prepare(sink, state, decoded.id),
            FrameType::PrepareAck => self.on_prepare_ack(sink, state, decoded.id, now),
            FrameType::Commit => self.on_commit(sink, state, decoded.id),
            FrameType::Complete => self.on_complete(sink, state, decoded.id),
        }
    }

    fn on_data(
        &self,
        sink: &dyn FrameSink,
        state: &ConnState,
        id: u64,
        payload: Vec<u8>,
        now: Instant,
    ) -> Inbound {
        if self.opts.level == QosLevel::None {
            return Inbound::Deliver(payload);
        }
        let fresh = {
            let mut q1 = state.qos1.write();
            q1.seen.register(id, self.opts.duplicate_ttl(), now)
        };
        // ACK every DATA at level 1, duplicates included; the peer may have
        // lost the first ACK.
        if self.opts.level == QosLevel::AtLeastOnce {
            sink.send_frame(frame::encode(FrameType::Ack, id, &[]));
        }
        if fresh {
            Inbound::Deliver(payload)
        } else {
            debug!(id, "suppressing duplicate DATA");
            Inbound::Dropped
        }
    }

    fn on_ack(&self, state: &ConnState, id: u64) -> Inbound {
        let mut q1 = state.qos1.write();
        if q1.pending.remove(&id).is_none() {
            warn!(id, "ACK for unknown message id");
        }
        Inbound::Handled
    }

    /// Receiver side of phase one: record the announced id and confirm.
    /// Idempotent because a lost PREPARE_ACK makes the peer resend PREPARE.
    fn on_prepare(&self, sink: &dyn FrameSink, state: &ConnState, id: u64) -> Inbound {
        state.qos2.write().recv_prepare.insert(id);
        sink.send_frame(frame::encode(FrameType::PrepareAck, id, &[]));
        Inbound::Handled
    }

    fn on_prepare_ack(
        &self,
        sink: &dyn FrameSink,
        state: &ConnState,
        id: u64,
        now: Instant,
    ) -> Inbound {
        let commit = frame::encode(FrameType::Commit, id, &[]);
        let advanced = {
            let mut q2 = state.qos2.write();
            let Qos2Tables {
                pending,
                pub_prepare,
                pending_resp,
                ..
            } = &mut *q2;
            match pending.get_mut(&id) {
                Some(meta) if meta.stage == Qos2Stage::Prepare => {
                    if let Some(payload) = pub_prepare.remove(&id) {
                        pending_resp.insert(id, payload);
                    }
                    meta.stage = Qos2Stage::Commit;
                    meta.frame = commit.clone();
                    meta.retry_count = 0;
                    meta.next_retry = now + self.opts.backoff.next_delay(1);
                    meta.last_touched = now;
                    true
                }
                _ => false,
            }
        };
        if advanced {
            sink.send_frame(commit);
        } else {
            warn!(id, "PREPARE_ACK without a matching PREPARE in flight");
        }
        Inbound::Handled
    }

    /// Receiver side of phase two. COMPLETE is sent even when no PREPARE was
    /// recorded: the peer clears its state on COMPLETE unconditionally, so a
    /// replayed COMMIT stays benign.
    fn on_commit(&self, sink: &dyn FrameSink, state: &ConnState, id: u64) -> Inbound {
        state.qos2.write().recv_prepare.remove(&id);
        sink.send_frame(frame::encode(FrameType::Complete, id, &[]));
        Inbound::Handled
    }

    fn on_complete(&self, sink: &dyn FrameSink, state: &ConnState, id: u64) -> Inbound {
        let released = {
            let mut q2 = state.qos2.write();
            q2.pending.remove(&id);
            q2.pending_resp.remove(&id)
        };
        match released {
            Some(payload) => {
                sink.send_frame(frame::encode(FrameType::Data, id, &payload));
            }
            None => debug!(id, "COMPLETE with no parked payload"),
        }
        Inbound::Handled
    }
}
