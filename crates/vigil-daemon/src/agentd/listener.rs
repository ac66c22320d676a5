//! TCP listener for agent connections.
//!
//! Each accepted connection performs a one-frame `connect` handshake
//! declaring its namespace, agent name, subscriptions, and content
//! type; the listener then builds a [`Session`] over the framed
//! connection and starts it. Connections that fail the handshake, or
//! declare a namespace the store does not know, are dropped.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::codec::codec_for_content_type;
use super::session::{Session, SessionConfig};
use crate::messaging::MessageBus;
use crate::metrics::BackendMetrics;
use crate::ring::Pool;
use crate::store::SessionStore;
use crate::transport::{FramedTransport, Transport, TYPE_CONNECT};

/// How long a freshly accepted connection may take to present its
/// handshake frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// The agent's one-frame connect handshake, JSON-encoded regardless of
/// the payload content type it negotiates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHandshake {
    /// Namespace the agent operates in.
    pub namespace: String,

    /// Agent (entity) name.
    pub agent_name: String,

    /// Subscriptions the agent declares.
    #[serde(default)]
    pub subscriptions: Vec<String>,

    /// Content type for session payloads.
    pub content_type: String,

    /// User the agent authenticated as.
    #[serde(default)]
    pub user: String,
}

/// Accept loop turning TCP connections into running agent sessions.
pub struct AgentListener {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn SessionStore>,
    ring_pool: Arc<Pool>,
    metrics: Arc<BackendMetrics>,
}

impl AgentListener {
    /// Creates a listener wiring sessions to the given subsystems.
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn SessionStore>,
        ring_pool: Arc<Pool>,
        metrics: Arc<BackendMetrics>,
    ) -> Self {
        Self {
            bus,
            store,
            ring_pool,
            metrics,
        }
    }

    /// Serves agent connections until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the I/O error that broke the accept loop.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> std::io::Result<()> {
        info!(addr = ?listener.local_addr().ok(), "agent listener started");
        loop {
            let (stream, peer) = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted?,
            };
            let handler = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = handler.handle_connection(stream, peer.to_string()).await {
                    warn!(addr = %peer, error = %e, "agent connection rejected");
                }
            });
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: String,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let conn: Arc<dyn Transport> = Arc::new(FramedTransport::new(stream));

        let hello = tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.receive()).await??;
        if hello.message_type != TYPE_CONNECT {
            return Err(format!(
                "expected {TYPE_CONNECT:?} frame, got {:?}",
                hello.message_type
            )
            .into());
        }
        let handshake: AgentHandshake = serde_json::from_slice(&hello.payload)?;
        let codec = codec_for_content_type(&handshake.content_type)?;

        let session = Session::new(
            SessionConfig {
                namespace: handshake.namespace,
                agent_name: handshake.agent_name,
                agent_addr: peer,
                user: handshake.user,
                subscriptions: handshake.subscriptions,
                content_type: handshake.content_type,
            },
            conn,
            Arc::clone(&self.bus),
            Arc::clone(&self.store),
            Arc::clone(&self.ring_pool),
            codec,
            Arc::clone(&self.metrics),
        )
        .await?;
        session.start().await?;
        Ok(())
    }
}
