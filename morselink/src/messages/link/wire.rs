use crate::errors::LinkError;
use std::{future::Future, io, time::Duration};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream,
};

/// Size of the native endian length prefix in front of every image frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Upper bound on how much text is accepted over a secondary connection.
pub const MAX_TEXT_LEN: usize = 4096;

/// Upper bound on a resolution descriptor.
pub const MAX_DESCRIPTOR_LEN: usize = 64;

/// Quiet period that ends a resolution descriptor.
pub const DESCRIPTOR_IDLE: Duration = Duration::from_millis(50);

/// Byte stream carrying the control protocol. Tokens are single bytes,
/// images are length prefixed blobs, and the secondary connection carries
/// raw text until the sender closes.
///
/// Every read is optionally bounded by `read_timeout`; expiry surfaces as
/// [`LinkError::Timeout`] rather than hanging the loop forever.
pub struct Link<S> {
    stream: BufStream<S>,
    read_timeout: Option<Duration>,
}

impl<S> Link<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream.
    ///
    /// * `stream`: tcp stream, or an in-memory duplex in tests.
    /// * `read_timeout`: bound on every read, `None` blocks indefinitely.
    pub fn new(stream: S, read_timeout: Option<Duration>) -> Self {
        Self {
            stream: BufStream::new(stream),
            read_timeout,
        }
    }

    /// Send a single byte token.
    pub async fn send_token(&mut self, token: u8) -> Result<(), LinkError> {
        self.send_bytes(&[token]).await
    }

    /// Block for one token. A closed connection is [`LinkError::PeerClosed`].
    pub async fn recv_token(&mut self) -> Result<u8, LinkError> {
        bounded(self.read_timeout, self.stream.read_u8()).await
    }

    /// Write raw bytes and flush them out.
    pub async fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive an unframed descriptor. Waits for the first byte, then keeps
    /// reading until nothing arrives for `idle` or `max` bytes are held. The
    /// peer sends nothing after a descriptor until it hears from us, so a
    /// quiet link marks its end even when it was split across segments.
    pub async fn recv_descriptor(
        &mut self,
        idle: Duration,
        max: usize,
    ) -> Result<Vec<u8>, LinkError> {
        let first = bounded(self.read_timeout, self.stream.fill_buf())
            .await?
            .to_vec();
        if first.is_empty() {
            return Err(LinkError::PeerClosed);
        }
        let mut descriptor = Vec::new();
        let mut chunk = first;
        loop {
            let take = chunk.len().min(max - descriptor.len());
            descriptor.extend_from_slice(&chunk[..take]);
            self.stream.consume(take);
            if descriptor.len() >= max {
                break;
            }
            chunk = match tokio::time::timeout(idle, self.stream.fill_buf()).await {
                Ok(read) => read?.to_vec(),
                Err(_) => break,
            };
            if chunk.is_empty() {
                break;
            }
        }
        Ok(descriptor)
    }

    /// Send an image frame: 4 byte native endian length then the data.
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let len = u32::try_from(frame.len()).map_err(|_| LinkError::FrameTooLarge {
            len: frame.len(),
            max: u32::MAX as usize,
        })?;
        self.stream.write_all(&len.to_ne_bytes()).await?;
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive one length prefixed frame, refusing lengths above `max`.
    pub async fn recv_frame(&mut self, max: usize) -> Result<Vec<u8>, LinkError> {
        let mut header = [0_u8; FRAME_HEADER_LEN];
        bounded(self.read_timeout, self.stream.read_exact(&mut header)).await?;
        let len = u32::from_ne_bytes(header) as usize;
        if len > max {
            return Err(LinkError::FrameTooLarge { len, max });
        }

        let mut frame = vec![0_u8; len];
        bounded(self.read_timeout, self.stream.read_exact(&mut frame)).await?;
        Ok(frame)
    }

    /// Read until the peer closes its side, keeping at most `max` bytes.
    pub async fn recv_to_end(&mut self, max: usize) -> Result<Vec<u8>, LinkError> {
        let mut data = Vec::new();
        let mut limited = (&mut self.stream).take(max as u64);
        bounded(self.read_timeout, limited.read_to_end(&mut data)).await?;
        Ok(data)
    }

    /// Flush and close the write side.
    pub async fn shutdown(&mut self) -> Result<(), LinkError> {
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Apply the optional read bound and fold end of stream into `PeerClosed`.
async fn bounded<T, F>(limit: Option<Duration>, fut: F) -> Result<T, LinkError>
where
    F: Future<Output = io::Result<T>>,
{
    let result = match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| LinkError::Timeout(limit))?,
        None => fut.await,
    };
    result.map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => LinkError::PeerClosed,
        _ => LinkError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    /// The bytes a decoder sees after framing are the bytes that were captured.
    async fn test_frame_round_trip_is_byte_identical() {
        let (a, b) = duplex(1 << 16);
        let mut sender = Link::new(a, None);
        let mut receiver = Link::new(b, None);

        let captured: Vec<u8> = (0..20_000_u32).map(|i| (i * 31 % 251) as u8).collect();
        let expected = captured.clone();
        let send = tokio::spawn(async move {
            sender.send_frame(&captured).await.unwrap();
            sender
        });

        let received = receiver.recv_frame(1 << 20).await.unwrap();
        send.await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_frame_header_is_native_endian_length() {
        let (a, mut b) = duplex(64);
        let mut sender = Link::new(a, None);
        sender.send_frame(b"jpeg").await.unwrap();

        let mut raw = [0_u8; 8];
        b.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw[..4], &4_u32.to_ne_bytes());
        assert_eq!(&raw[4..], b"jpeg");
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let (a, b) = duplex(64);
        let mut sender = Link::new(a, None);
        let mut receiver = Link::new(b, None);
        sender.send_frame(&[]).await.unwrap();
        assert!(receiver.recv_frame(16).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_refused() {
        let (a, b) = duplex(64);
        let mut sender = Link::new(a, None);
        let mut receiver = Link::new(b, None);
        sender.send_frame(&[7; 32]).await.unwrap();
        assert!(matches!(
            receiver.recv_frame(16).await,
            Err(LinkError::FrameTooLarge { len: 32, max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_tokens_and_peer_close() {
        let (a, b) = duplex(64);
        let mut sender = Link::new(a, None);
        let mut receiver = Link::new(b, None);

        sender.send_token(b'R').await.unwrap();
        sender.send_token(b'z').await.unwrap();
        assert_eq!(receiver.recv_token().await.unwrap(), b'R');
        assert_eq!(receiver.recv_token().await.unwrap(), b'z');

        drop(sender);
        assert!(matches!(
            receiver.recv_token().await,
            Err(LinkError::PeerClosed)
        ));
    }

    #[tokio::test]
    /// Command and resolution descriptor may arrive in the same segment.
    async fn test_resolution_after_coalesced_command() {
        let (a, b) = duplex(64);
        let mut sender = Link::new(a, None);
        let mut receiver = Link::new(b, None);

        sender.send_bytes(b"r800x600").await.unwrap();
        assert_eq!(receiver.recv_token().await.unwrap(), b'r');
        assert_eq!(
            receiver
                .recv_descriptor(DESCRIPTOR_IDLE, MAX_DESCRIPTOR_LEN)
                .await
                .unwrap(),
            b"800x600"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_descriptor_is_read_whole() {
        let (a, b) = duplex(64);
        let mut receiver = Link::new(b, None);
        let sender = tokio::spawn(async move {
            let mut sender = Link::new(a, None);
            sender.send_bytes(b"r800").await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            sender.send_bytes(b"x600").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            sender.send_token(b'R').await.unwrap();
            sender
        });

        assert_eq!(receiver.recv_token().await.unwrap(), b'r');
        assert_eq!(
            receiver
                .recv_descriptor(DESCRIPTOR_IDLE, MAX_DESCRIPTOR_LEN)
                .await
                .unwrap(),
            b"800x600"
        );
        assert_eq!(receiver.recv_token().await.unwrap(), b'R');
        drop(sender.await.unwrap());
    }

    #[tokio::test]
    async fn test_descriptor_is_capped() {
        let (a, b) = duplex(256);
        let mut sender = Link::new(a, None);
        let mut receiver = Link::new(b, None);

        sender.send_bytes(&[b'9'; 100]).await.unwrap();
        let descriptor = receiver.recv_descriptor(DESCRIPTOR_IDLE, 8).await.unwrap();
        assert_eq!(descriptor, b"99999999");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout() {
        let (_a, b) = duplex(64);
        let mut receiver = Link::new(b, Some(Duration::from_secs(5)));
        assert!(matches!(
            receiver.recv_token().await,
            Err(LinkError::Timeout(d)) if d == Duration::from_secs(5)
        ));
    }

    #[tokio::test]
    async fn test_text_until_close() {
        let (a, b) = duplex(64);
        let mut sender = Link::new(a, None);
        let mut receiver = Link::new(b, None);

        sender.send_bytes(b"hello world").await.unwrap();
        sender.shutdown().await.unwrap();
        assert_eq!(receiver.recv_to_end(MAX_TEXT_LEN).await.unwrap(), b"hello world");
    }
}
