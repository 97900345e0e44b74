//! Message transport over any async byte stream.
//!
//! [`FramedStream`] reads and writes whole [`Message`]s, one frame each. It
//! applies no deadlines of its own; callers wrap each call in the timeout that
//! belongs to that step of the exchange.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::framing::{FrameCodec, FRAME_PREFIX_SIZE};
use crate::messages::{Envelope, Message};

/// A byte stream speaking the framed backend protocol.
pub struct FramedStream<S> {
    io: S,
    codec: FrameCodec,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S) -> Self {
        Self {
            io,
            codec: FrameCodec::new(),
        }
    }

    pub fn with_codec(io: S, codec: FrameCodec) -> Self {
        Self { io, codec }
    }

    /// Encode and write one message, flushing the stream.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        let payload = Envelope::new(message).to_msgpack()?;
        let frame = self.codec.encode(&payload)?;
        self.io.write_all(&frame).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Read exactly one message.
    ///
    /// A stream that ends before a frame is complete yields
    /// `ProtocolError::ConnectionClosed`.
    pub async fn recv(&mut self) -> Result<Message> {
        let mut prefix = [0u8; FRAME_PREFIX_SIZE];
        self.io.read_exact(&mut prefix).await?;
        let content_len = self.codec.parse_prefix(&prefix)?;

        let mut content = vec![0u8; content_len];
        self.io.read_exact(&mut content).await?;
        let payload = self.codec.decode_content(&content)?;

        Ok(Envelope::from_msgpack(&payload)?.payload)
    }

    /// Shut down the write side. Errors are ignored since the peer may be gone.
    pub async fn close(&mut self) {
        let _ = self.io.shutdown().await;
    }

    pub fn into_inner(self) -> S {
        self.io
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::messages::{ChunkData, Response, TransferFooter};
    use crate::value::ValueMap;

    #[tokio::test]
    async fn test_messages_cross_a_duplex_in_order() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut left = FramedStream::new(a);
        let mut right = FramedStream::new(b);

        left.send(Message::ChunkData(ChunkData {
            bytes: vec![9; 4096],
        }))
        .await
        .unwrap();
        left.send(Message::TransferFooter(TransferFooter::clean()))
            .await
            .unwrap();

        match right.recv().await.unwrap() {
            Message::ChunkData(chunk) => assert_eq!(chunk.bytes, vec![9; 4096]),
            other => panic!("unexpected {}", other.kind()),
        }
        assert_eq!(
            right.recv().await.unwrap(),
            Message::TransferFooter(TransferFooter::clean())
        );
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_connection_closed() {
        let (a, mut b) = tokio::io::duplex(1024);
        let frame = FrameCodec::new()
            .encode(
                &Envelope::new(Message::Response(Response::ok(ValueMap::new())))
                    .to_msgpack()
                    .unwrap(),
            )
            .unwrap();
        b.write_all(&frame[..frame.len() - 2]).await.unwrap();
        drop(b);

        let mut reader = FramedStream::new(a);
        let err = reader.recv().await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_garbage_is_rejected() {
        let (a, mut b) = tokio::io::duplex(1024);
        b.write_all(b"HTTP/1.1 400 Bad Request\r\n").await.unwrap();

        let mut reader = FramedStream::new(a);
        let err = reader.recv().await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFrameMagic { .. }));
    }
}
