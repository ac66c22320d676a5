//! Session wire codecs.
//!
//! Each session negotiates a content type at handshake and uses it for
//! every payload on the connection: protobuf for
//! `application/octet-stream`, JSON for `application/json`. The codec
//! is injected at session construction so encodings can be swapped
//! without touching the session.

use std::sync::Arc;

use prost::Message;
use thiserror::Error;
use vigil_core::{CheckRequest, Event};

/// Content type selecting protobuf payload encoding.
pub const CONTENT_TYPE_PROTOBUF: &str = "application/octet-stream";

/// Content type selecting JSON payload encoding.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Errors surfaced while encoding or decoding session payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON encoding or decoding failed.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protobuf decoding failed.
    #[error("protobuf codec error: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// The negotiated content type is not supported.
    #[error("unsupported content type {0:?}")]
    UnsupportedContentType(String),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes outbound check requests and decodes inbound events for one
/// session.
pub trait WireCodec: Send + Sync {
    /// The content type this codec implements.
    fn content_type(&self) -> &'static str;

    /// Encodes a check request for the wire.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when encoding fails.
    fn marshal_check_request(&self, request: &CheckRequest) -> CodecResult<Vec<u8>>;

    /// Decodes an event from the wire.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the payload does not decode.
    fn unmarshal_event(&self, payload: &[u8]) -> CodecResult<Event>;
}

/// JSON payload codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }

    fn marshal_check_request(&self, request: &CheckRequest) -> CodecResult<Vec<u8>> {
        Ok(serde_json::to_vec(request)?)
    }

    fn unmarshal_event(&self, payload: &[u8]) -> CodecResult<Event> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Protobuf payload codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufCodec;

impl WireCodec for ProtobufCodec {
    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_PROTOBUF
    }

    fn marshal_check_request(&self, request: &CheckRequest) -> CodecResult<Vec<u8>> {
        Ok(request.encode_to_vec())
    }

    fn unmarshal_event(&self, payload: &[u8]) -> CodecResult<Event> {
        Ok(Event::decode(payload)?)
    }
}

/// Resolves the codec for a negotiated content type.
///
/// # Errors
///
/// Returns [`CodecError::UnsupportedContentType`] for anything other
/// than the protobuf and JSON content types.
pub fn codec_for_content_type(content_type: &str) -> CodecResult<Arc<dyn WireCodec>> {
    match content_type {
        CONTENT_TYPE_PROTOBUF => Ok(Arc::new(ProtobufCodec)),
        CONTENT_TYPE_JSON => Ok(Arc::new(JsonCodec)),
        other => Err(CodecError::UnsupportedContentType(other.to_string())),
    }
}
