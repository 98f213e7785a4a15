//! Transport layer: handshake binding and the WebSocket driver.

pub mod inspector;
pub mod ws;

pub use inspector::{DefaultInspector, HandshakeInspector};
pub use ws::{
    ConnEntry, ConnId, DataCallback, ReplyPort, SessionCallback, SocketHandle, WsTransport,
    CLOSE_OVERFLOW, CLOSE_REPLACED,
};
