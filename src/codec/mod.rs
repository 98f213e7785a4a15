//! Pluggable payload codecs.
//!
//! A codec maps between raw DATA payloads and `(method, payload)` request
//! envelopes; the reliability core is codec-agnostic.

pub mod msgpack;
pub mod text;

use thiserror::Error;

use crate::rpc::error::ErrorObj;

pub use msgpack::MsgpackCodec;
pub use text::TextCodec;

/// A request as understood by the dispatch layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed request: {0}")]
    Malformed(String),
}

pub trait WireCodec: Send + Sync {
    /// Parses a DATA payload into a request envelope.
    fn parse(&self, data: &[u8]) -> Result<ParsedRequest, CodecError>;

    /// Serializes a response envelope.
    fn serialize(&self, method: &str, payload: &[u8]) -> Vec<u8>;

    /// Serializes an error frame for the originating connection.
    fn serialize_error(&self, err: &ErrorObj) -> Vec<u8>;
}
