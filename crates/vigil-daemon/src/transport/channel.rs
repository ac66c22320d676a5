//! In-process duplex transport used by tests.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Transport, TransportError, TransportMessage, TransportResult};

/// Capacity of each direction of the duplex.
const CHANNEL_CAPACITY: usize = 64;

/// One end of an in-process duplex channel. Both ends implement
/// [`Transport`]; what one end sends the other receives.
pub struct ChannelTransport {
    tx: Mutex<Option<mpsc::Sender<TransportMessage>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<TransportMessage>>,
}

impl ChannelTransport {
    /// Creates a connected pair of transports.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                tx: Mutex::new(Some(a_tx)),
                rx: tokio::sync::Mutex::new(b_rx),
            },
            Self {
                tx: Mutex::new(Some(b_tx)),
                rx: tokio::sync::Mutex::new(a_rx),
            },
        )
    }

    fn sender(&self) -> TransportResult<mpsc::Sender<TransportMessage>> {
        let guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let tx = self.sender()?;
        tx.send(message).await.map_err(|_| TransportError::Closed)
    }

    async fn receive(&self) -> TransportResult<TransportMessage> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&self) -> TransportResult<()> {
        let mut guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
        Ok(())
    }
}
