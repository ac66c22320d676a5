//! Transport over a real byte stream.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use super::framing::MessageCodec;
use super::{Transport, TransportError, TransportMessage, TransportResult};

/// [`Transport`] over any `AsyncRead + AsyncWrite` byte stream, framed
/// with [`MessageCodec`]. The sink and stream halves are locked
/// independently so the session's send and receive pumps never contend.
pub struct FramedTransport<T> {
    sink: Mutex<SplitSink<Framed<T, MessageCodec>, TransportMessage>>,
    stream: Mutex<SplitStream<Framed<T, MessageCodec>>>,
}

impl<T> FramedTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps a byte stream with the default codec.
    #[must_use]
    pub fn new(io: T) -> Self {
        let (sink, stream) = Framed::new(io, MessageCodec::new()).split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl<T> Transport for FramedTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let mut sink = self.sink.lock().await;
        sink.send(message).await.map_err(into_connection_error)
    }

    async fn receive(&self) -> TransportResult<TransportMessage> {
        let mut stream = self.stream.lock().await;
        match stream.next().await {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(e),
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&self) -> TransportResult<()> {
        let mut sink = self.sink.lock().await;
        sink.close().await.map_err(into_connection_error)
    }
}

/// I/O failures on the wire are connection-level: the session stops on
/// them rather than retrying.
fn into_connection_error(err: TransportError) -> TransportError {
    match err {
        TransportError::Io(e) => TransportError::Connection(e.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::transport::TYPE_CHECK_REQUEST;

    #[tokio::test]
    async fn frames_cross_a_duplex_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let client = FramedTransport::new(client);
        let server = FramedTransport::new(server);

        let msg = TransportMessage::new(TYPE_CHECK_REQUEST, Bytes::from_static(b"req"));
        client.send(msg.clone()).await.unwrap();
        assert_eq!(server.receive().await.unwrap(), msg);
    }

    #[tokio::test]
    async fn closed_stream_reports_disconnect() {
        let (client, server) = tokio::io::duplex(1024);
        let client = FramedTransport::new(client);
        let server = FramedTransport::new(server);

        client.close().await.unwrap();
        drop(client);
        let err = server.receive().await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
