//! Newline-free text codec: `method:payload`.
//!
//! The smallest useful envelope; handy for smoke tests and line tooling.

use super::{CodecError, ParsedRequest, WireCodec};
use crate::rpc::error::ErrorObj;

#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl WireCodec for TextCodec {
    fn parse(&self, data: &[u8]) -> Result<ParsedRequest, CodecError> {
        let split = data
            .iter()
            .position(|b| *b == b':')
            .ok_or_else(|| CodecError::Malformed("missing ':' separator".into()))?;
        let method = std::str::from_utf8(&data[..split])
            .map_err(|_| CodecError::Malformed("method is not UTF-8".into()))?;
        if method.is_empty() {
            return Err(CodecError::Malformed("empty method".into()));
        }
        Ok(ParsedRequest {
            method: method.to_string(),
            payload: data[split + 1..].to_vec(),
        })
    }

    fn serialize(&self, method: &str, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(method.len() + 1 + payload.len());
        out.extend_from_slice(method.as_bytes());
        out.push(b':');
        out.extend_from_slice(payload);
        out
    }

    fn serialize_error(&self, err: &ErrorObj) -> Vec<u8> {
        format!("error:{}:{}", err.code.code(), err.msg).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::error::RpcErr;

    #[test]
    fn parses_method_and_payload() {
        let req = TextCodec.parse(b"echo:hello world").unwrap();
        assert_eq!(req.method, "echo");
        assert_eq!(req.payload, b"hello world");
    }

    #[test]
    fn payload_may_contain_separators() {
        let req = TextCodec.parse(b"set:key:value").unwrap();
        assert_eq!(req.method, "set");
        assert_eq!(req.payload, b"key:value");
    }

    #[test]
    fn rejects_missing_separator_and_empty_method() {
        assert!(TextCodec.parse(b"no-separator").is_err());
        assert!(TextCodec.parse(b":payload").is_err());
    }

    #[test]
    fn round_trips() {
        let bytes = TextCodec.serialize("echo", b"hi");
        let req = TextCodec.parse(&bytes).unwrap();
        assert_eq!(req.method, "echo");
        assert_eq!(req.payload, b"hi");
    }

    #[test]
    fn error_frame_shape() {
        let bytes = TextCodec.serialize_error(&ErrorObj::new(RpcErr::NotFound, "no such method"));
        assert_eq!(bytes, b"error:3:no such method");
    }
}
