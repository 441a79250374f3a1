//! Byte-stream framer
//!
//! Wraps a possibly fragmented byte stream and hands out complete,
//! length-prefixed messages. A message is either returned whole or the
//! read fails; partial messages never leave this module.

use crate::error::{PgWireError, Result};
use bytes::{Buf, Bytes, BytesMut};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use wireprobe_core::Deadline;

/// Size of the tag byte plus the length word
const HEADER_LEN: usize = 5;

/// Initial capacity of the receive buffer
const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// One complete protocol message as it came off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Message type byte
    pub tag: u8,

    /// Body, excluding the five-byte header
    pub payload: Bytes,
}

impl RawMessage {
    /// Size of the message on the wire
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// Owns a stream and the receive buffer that reassembles its messages
#[derive(Debug)]
pub struct MessageFramer<S> {
    stream: S,
    buffer: BytesMut,
    max_message_len: usize,
    bytes_read: u64,
    bytes_written: u64,
}

impl<S> MessageFramer<S> {
    /// Wrap a stream, rejecting messages that declare more than `max_message_len` bytes
    pub fn new(stream: S, max_message_len: usize) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_message_len,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    /// Bytes currently buffered but not yet handed out
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes pulled from the stream
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Total bytes written to the stream
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Get a reference to the underlying stream
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    fn declared_len(&self, offset: usize) -> Result<usize> {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.buffer[offset..offset + 4]);
        let len = i32::from_be_bytes(word);

        if len < 4 {
            return Err(PgWireError::Protocol(format!(
                "Invalid message length: {}",
                len
            )));
        }
        let len = len as usize;
        if len > self.max_message_len {
            return Err(PgWireError::Protocol(format!(
                "Message length {} exceeds limit of {} bytes",
                len, self.max_message_len
            )));
        }
        Ok(len)
    }
}

impl<S: AsyncRead + Unpin> MessageFramer<S> {
    /// Buffer at least `n` bytes, reading from the stream as needed
    pub async fn ensure(&mut self, n: usize, deadline: Deadline) -> Result<()> {
        if self.buffer.len() < n {
            self.buffer.reserve(n - self.buffer.len());
        }

        while self.buffer.len() < n {
            let read = deadline.run(self.stream.read_buf(&mut self.buffer)).await??;
            if read == 0 {
                return Err(PgWireError::Connection(format!(
                    "Connection closed by peer with {} of {} bytes buffered",
                    self.buffer.len(),
                    n
                )));
            }
            self.bytes_read += read as u64;
        }

        Ok(())
    }

    /// Read one complete tagged message
    pub async fn read_message(&mut self, deadline: Deadline) -> Result<RawMessage> {
        self.ensure(HEADER_LEN, deadline).await?;
        let len = self.declared_len(1)?;
        self.ensure(1 + len, deadline).await?;

        let tag = self.buffer[0];
        self.buffer.advance(HEADER_LEN);
        let payload = self.buffer.split_to(len - 4).freeze();

        debug!("<- {:?} ({} bytes)", tag as char, payload.len());
        Ok(RawMessage { tag, payload })
    }

    /// Read an untagged startup message, returning the body after the length word
    pub async fn read_startup(&mut self, deadline: Deadline) -> Result<Bytes> {
        self.ensure(4, deadline).await?;
        let len = self.declared_len(0)?;
        self.ensure(len, deadline).await?;

        self.buffer.advance(4);
        Ok(self.buffer.split_to(len - 4).freeze())
    }
}

impl<S: AsyncWrite + Unpin> MessageFramer<S> {
    /// Write already-encoded bytes and flush them
    pub async fn send(&mut self, bytes: &[u8], deadline: Deadline) -> Result<()> {
        let stream = &mut self.stream;
        deadline
            .run(async move {
                stream.write_all(bytes).await?;
                stream.flush().await
            })
            .await??;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Shut down the write half of the stream
    pub async fn shutdown(&mut self, deadline: Deadline) -> Result<()> {
        deadline.run(self.stream.shutdown()).await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::ReadBuf;

    /// Yields its chunks one read at a time, then end of stream
    struct Chunked {
        chunks: VecDeque<Vec<u8>>,
    }

    impl Chunked {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks: chunks.into_iter().filter(|c| !c.is_empty()).collect(),
            }
        }
    }

    impl AsyncRead for Chunked {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if let Some(mut chunk) = self.chunks.pop_front() {
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                if n < chunk.len() {
                    let rest = chunk.split_off(n);
                    self.chunks.push_front(rest);
                }
            }
            Poll::Ready(Ok(()))
        }
    }

    fn encode(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(tag);
        buf.put_u32(payload.len() as u32 + 4);
        buf.put_slice(payload);
        buf.to_vec()
    }

    async fn read_all(chunks: Vec<Vec<u8>>, count: usize) -> Result<Vec<RawMessage>> {
        let mut framer = MessageFramer::new(Chunked::new(chunks), 1024 * 1024);
        let deadline = Deadline::after(Duration::from_secs(5));
        let mut messages = Vec::new();
        for _ in 0..count {
            messages.push(framer.read_message(deadline).await?);
        }
        Ok(messages)
    }

    #[tokio::test]
    async fn test_read_message_splits_header_and_payload() {
        let mut stream = encode(b'Z', b"I");
        stream.extend(encode(b'C', b"SELECT 1\0"));

        let messages = read_all(vec![stream], 2).await.unwrap();
        assert_eq!(messages[0].tag, b'Z');
        assert_eq!(&messages[0].payload[..], b"I");
        assert_eq!(messages[1].tag, b'C');
        assert_eq!(&messages[1].payload[..], b"SELECT 1\0");
        assert_eq!(messages[1].wire_len(), 14);
    }

    #[tokio::test]
    async fn test_eof_mid_message_is_connection_error() {
        let stream = encode(b'C', b"SELECT 1\0");
        let truncated = stream[..7].to_vec();

        let err = read_all(vec![truncated], 1).await.unwrap_err();
        assert!(err.is_connection(), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_invalid_lengths_are_protocol_errors() {
        let short = vec![b'Z', 0, 0, 0, 3];
        assert!(matches!(
            read_all(vec![short], 1).await,
            Err(PgWireError::Protocol(_))
        ));

        let mut framer = MessageFramer::new(Chunked::new(vec![encode(b'd', &[0u8; 64])]), 32);
        let result = framer.read_message(Deadline::after_millis(1000)).await;
        assert!(matches!(result, Err(PgWireError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_read_times_out_at_deadline() {
        let (client, _server) = tokio::io::duplex(64);
        let mut framer = MessageFramer::new(client, 1024);

        let err = framer
            .read_message(Deadline::after_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_send_counts_bytes() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut framer = MessageFramer::new(client, 1024);
        framer
            .send(&encode(b'X', b""), Deadline::after_millis(1000))
            .await
            .unwrap();
        assert_eq!(framer.bytes_written(), 5);

        let mut received = [0u8; 5];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, [b'X', 0, 0, 0, 4]);
    }

    #[tokio::test]
    async fn test_read_startup() {
        let mut stream = BytesMut::new();
        stream.put_u32(12);
        stream.put_u32(0x0003_0000);
        stream.put_slice(b"a\0\0\0");

        let mut framer = MessageFramer::new(Chunked::new(vec![stream.to_vec()]), 1024);
        let body = framer.read_startup(Deadline::after_millis(1000)).await.unwrap();
        assert_eq!(&body[..], &[0, 3, 0, 0, b'a', 0, 0, 0][..]);
    }

    proptest! {
        #[test]
        fn prop_split_stream_reassembles_identically(
            messages in prop::collection::vec(
                (any::<u8>(), prop::collection::vec(any::<u8>(), 0..64)),
                1..8,
            ),
            cuts in prop::collection::vec(1usize..16, 1..32),
        ) {
            let stream: Vec<u8> = messages
                .iter()
                .flat_map(|(tag, payload)| encode(*tag, payload))
                .collect();

            let mut chunks = Vec::new();
            let mut offset = 0;
            for size in cuts.iter().cycle() {
                if offset >= stream.len() {
                    break;
                }
                let end = (offset + size).min(stream.len());
                chunks.push(stream[offset..end].to_vec());
                offset = end;
            }

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let whole = runtime.block_on(read_all(vec![stream.clone()], messages.len())).unwrap();
            let split = runtime.block_on(read_all(chunks, messages.len())).unwrap();

            prop_assert_eq!(&whole, &split);
            for (message, (tag, payload)) in split.iter().zip(messages.iter()) {
                prop_assert_eq!(message.tag, *tag);
                prop_assert_eq!(&message.payload[..], &payload[..]);
            }
        }
    }
}
