#![deny(clippy::all)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Function complexity: some functions are inherently complex
#![allow(clippy::too_many_lines)]
#![allow(clippy::too_many_arguments)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Numeric casts: intentional in protocol code
#![allow(clippy::cast_possible_truncation)]

//! Photon - reliable WebSocket RPC fabric.
//!
//! Bidirectional binary messaging over WebSocket with configurable
//! delivery guarantees. Clients identify at handshake time and bind to
//! long-lived sessions that survive transient disconnects; outgoing frames
//! travel at one of three MQTT-style service levels, re-driven by a retry
//! scheduler until the peer confirms them.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//! - `core::runtime` - Runtime orchestration and shutdown
//! - `core::time` - Deterministic time utilities
//!
//! ## Wire
//! - `wire::frame` - Frame codec (type byte, big-endian id, payload)
//!
//! ## QoS
//! - `qos::engine` - Send paths and inbound state machine transitions
//! - `qos::conn_state` - Per-connection pending tables and seen window
//! - `qos::scheduler` - Retry sweeps and session reaping
//! - `qos::backoff` - Linear and exponential retry delays
//! - `qos::dedupe` - Request-payload duplicate suppression
//!
//! ## Sessions
//! - `session::store` - Identity and id indices, offline queues
//! - `session::session` - Per-client state and typed fields
//! - `session::index` - Multi-field secondary index
//! - `session::offline` - Bounded offline mailbox
//!
//! ## Transport
//! - `transport::ws` - WebSocket driver: accept, reader/writer split,
//!   bounded send queues
//! - `transport::inspector` - Handshake identity extraction
//!
//! ## RPC
//! - `rpc::dispatcher` - Method registry and worker execution
//! - `rpc::middleware` - Global and per-method chains
//! - `rpc::api` - Framework API for handler code
//!
//! ## Codecs
//! - `codec::text` - `method:payload` envelope
//! - `codec::msgpack` - MessagePack envelope

// Core infrastructure
pub mod core;

// Wire protocol
pub mod wire;

// Reliability
pub mod qos;

// Sessions
pub mod session;

// Transport
pub mod transport;

// Dispatch
pub mod rpc;

// Payload codecs
pub mod codec;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, runtime, time};
pub use self::core::{Config, Runtime};
pub use codec::{MsgpackCodec, TextCodec, WireCodec};
pub use qos::{QosEngine, QosLevel, ReliableOptions};
pub use rpc::{FrameworkApi, RpcContext, RpcErr};
pub use session::{ClientIdentity, FieldValue, Session, SessionStore};
pub use transport::{DefaultInspector, HandshakeInspector, WsTransport};
