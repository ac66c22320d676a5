//! Agent connection handling.
//!
//! This module owns the server side of every agent connection: the
//! [`Session`] state machine bridging one transport to the message bus
//! and the subscription rings, the content-type payload codecs, proxy
//! entity resolution, and the TCP [`AgentListener`] that turns accepted
//! connections into running sessions.

pub mod codec;
mod entity;
pub mod listener;
pub mod session;

pub use codec::{
    codec_for_content_type, CodecError, CodecResult, JsonCodec, ProtobufCodec, WireCodec,
    CONTENT_TYPE_JSON, CONTENT_TYPE_PROTOBUF,
};
pub use listener::{AgentHandshake, AgentListener};
pub use session::{Session, SessionConfig, SessionError, SessionResult};
