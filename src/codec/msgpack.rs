//! MessagePack codec.
//!
//! Requests and responses travel as a named map `{method, payload}` with
//! the payload as a binary field; errors as `{error, code, msg}`.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use super::{CodecError, ParsedRequest, WireCodec};
use crate::rpc::error::ErrorObj;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    method: String,
    payload: ByteBuf,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    error: bool,
    code: i32,
    msg: &'a str,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackCodec;

impl WireCodec for MsgpackCodec {
    fn parse(&self, data: &[u8]) -> Result<ParsedRequest, CodecError> {
        let envelope: Envelope = rmp_serde::from_slice(data)
            .map_err(|err| CodecError::Malformed(err.to_string()))?;
        if envelope.method.is_empty() {
            return Err(CodecError::Malformed("empty method".into()));
        }
        Ok(ParsedRequest {
            method: envelope.method,
            payload: envelope.payload.into_vec(),
        })
    }

    fn serialize(&self, method: &str, payload: &[u8]) -> Vec<u8> {
        let envelope = Envelope {
            method: method.to_string(),
            payload: ByteBuf::from(payload.to_vec()),
        };
        // A map of a string and a byte buffer cannot fail to encode.
        rmp_serde::to_vec_named(&envelope).unwrap_or_default()
    }

    fn serialize_error(&self, err: &ErrorObj) -> Vec<u8> {
        let envelope = ErrorEnvelope {
            error: true,
            code: err.code.code(),
            msg: &err.msg,
        };
        rmp_serde::to_vec_named(&envelope).unwrap_or_default()
    }
}
