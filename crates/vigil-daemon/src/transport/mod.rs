//! Framed agent transport.
//!
//! Agents talk to the backend over a bidirectional channel of typed,
//! length-prefixed frames. The [`Transport`] trait is the seam the
//! session layer consumes; [`FramedTransport`] drives a real byte
//! stream through the [`MessageCodec`], and [`ChannelTransport`] is the
//! in-process duplex used by tests.

pub mod channel;
pub mod framed;
pub mod framing;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use channel::ChannelTransport;
pub use framed::FramedTransport;
pub use framing::{MessageCodec, MAX_FRAME_SIZE};

/// Message type of agent keepalives.
pub const TYPE_KEEPALIVE: &str = "keepalive";

/// Message type of check-result events.
pub const TYPE_EVENT: &str = "event";

/// Message type of check execution requests.
pub const TYPE_CHECK_REQUEST: &str = "check_request";

/// Message type of the agent's one-frame connect handshake.
pub const TYPE_CONNECT: &str = "connect";

/// Header carrying the namespace of agent-originated HTTP requests.
pub const HEADER_NAMESPACE: &str = "Vigil-Namespace";

/// Header carrying the agent name of agent-originated HTTP requests.
pub const HEADER_AGENT_NAME: &str = "Vigil-AgentName";

/// Header carrying the user of agent-originated HTTP requests.
pub const HEADER_USER: &str = "Vigil-User";

/// A typed frame exchanged with an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    /// Frame type; one of the `TYPE_*` constants.
    pub message_type: String,

    /// Opaque payload, encoded per the session's content type.
    pub payload: Bytes,
}

impl TransportMessage {
    /// Creates a message of the given type.
    #[must_use]
    pub fn new(message_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type: message_type.into(),
            payload: payload.into(),
        }
    }
}

/// Errors surfaced by transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection was closed by either side.
    #[error("connection closed")]
    Closed,

    /// The connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A frame exceeded the codec's size limit.
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Observed frame size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// A frame failed structural validation.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The underlying byte stream failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True for errors that mean the connection is gone: the session
    /// stops on these instead of logging and continuing.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Closed | Self::Connection(_) | Self::Io(_))
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// A bidirectional, typed message channel to one agent.
///
/// Implementations are single-writer/single-reader: the session's send
/// pump is the only caller of `send` and its receive pump the only
/// caller of `receive`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one message.
    async fn send(&self, message: TransportMessage) -> TransportResult<()>;

    /// Receives the next message, waiting until one arrives.
    async fn receive(&self) -> TransportResult<TransportMessage>;

    /// Closes the connection. Pending receives fail with
    /// [`TransportError::Closed`].
    async fn close(&self) -> TransportResult<()>;
}
