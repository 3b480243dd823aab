//! Framed, half-duplex connection over any async byte stream.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::writer::write_frame;
use crate::codec::Message;
use crate::error::{CubeError, Result};
use crate::protocol::{build_frame_parts, Frame, FrameBuffer, DEFAULT_MAX_FRAME_LENGTH};

/// Read buffer size per `read` call.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Byte stream a [`Connection`] can run over.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Per-operation limits applied to every read and write.
#[derive(Debug, Clone, Default)]
pub struct IoPolicy {
    /// Deadline for a single frame read or write.
    pub timeout: Option<Duration>,
    /// Aborts the in-flight operation when cancelled.
    pub cancel: Option<CancellationToken>,
}

/// A frame-level connection.
///
/// Reads and writes whole frames. An operation that does not complete
/// (error, timeout, cancellation, or a dropped future) leaves the connection
/// poisoned: the byte stream may be mid-frame and every later call fails
/// with [`CubeError::SessionPoisoned`].
pub struct Connection {
    /// `None` once closed.
    stream: Option<Box<dyn ByteStream>>,
    frames: FrameBuffer,
    read_buf: Vec<u8>,
    policy: IoPolicy,
    in_flight: bool,
}

impl Connection {
    /// Wrap `stream` with the default frame length ceiling.
    pub fn new<S: ByteStream + 'static>(stream: S) -> Self {
        Self::with_max_frame_length(stream, DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Wrap `stream`, rejecting frames longer than `max_frame_length`.
    pub fn with_max_frame_length<S: ByteStream + 'static>(stream: S, max_frame_length: u32) -> Self {
        Self {
            stream: Some(Box::new(stream)),
            frames: FrameBuffer::with_max_frame_length(max_frame_length),
            read_buf: vec![0u8; READ_BUFFER_SIZE],
            policy: IoPolicy::default(),
            in_flight: false,
        }
    }

    /// Replace the I/O policy.
    pub fn set_policy(&mut self, policy: IoPolicy) {
        self.policy = policy;
    }

    /// Current I/O policy.
    pub fn policy(&self) -> &IoPolicy {
        &self.policy
    }

    /// Whether an earlier operation was interrupted.
    pub fn is_poisoned(&self) -> bool {
        self.in_flight
    }

    /// Whether [`close`](Self::close) has released the stream.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Read the next complete frame.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        self.ensure_open()?;
        self.begin()?;
        let IoPolicy { timeout, cancel } = self.policy.clone();
        let frame = bounded("read frame", timeout, cancel, self.read_frame_unbounded()).await?;
        self.in_flight = false;

        tracing::trace!(
            message_type = frame.type_byte,
            payload_len = frame.payload_len(),
            "frame received"
        );
        Ok(frame)
    }

    /// Read and decode the next message.
    pub async fn read_message(&mut self) -> Result<Message> {
        let frame = self.read_frame().await?;
        Message::from_frame(frame)
    }

    /// Write one frame.
    pub async fn write_frame(&mut self, type_byte: u8, payload: &[u8]) -> Result<()> {
        let (header, payload) = build_frame_parts(type_byte, payload)?;
        self.ensure_open()?;
        self.begin()?;
        let IoPolicy { timeout, cancel } = self.policy.clone();
        let stream = self.stream.as_mut().ok_or(CubeError::SessionClosed)?;
        bounded(
            "write frame",
            timeout,
            cancel,
            write_frame(stream, &header, payload),
        )
        .await?;
        self.in_flight = false;

        tracing::trace!(message_type = type_byte, payload_len = payload.len(), "frame sent");
        Ok(())
    }

    /// Encode and write a message.
    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        let (type_byte, payload) = message.encode();
        self.write_frame(type_byte, &payload).await
    }

    /// Shut down the write half. Errors are ignored; the peer may be gone.
    pub async fn shutdown(&mut self) {
        use tokio::io::AsyncWriteExt;

        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!("Shutdown error: {}", e);
            }
        }
    }

    /// Shut down and release the stream. Later reads and writes fail with
    /// [`CubeError::SessionClosed`].
    pub async fn close(&mut self) {
        self.shutdown().await;
        self.stream = None;
        self.frames.clear();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.stream.is_none() {
            return Err(CubeError::SessionClosed);
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        if self.in_flight {
            return Err(CubeError::SessionPoisoned);
        }
        self.in_flight = true;
        Ok(())
    }

    async fn read_frame_unbounded(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.frames.next_frame()? {
                return Ok(frame);
            }

            let stream = self.stream.as_mut().ok_or(CubeError::SessionClosed)?;
            let n = stream.read(&mut self.read_buf).await?;
            if n == 0 {
                let (expected, received) = self.frames.pending();
                return Err(CubeError::ConnectionClosed { expected, received });
            }
            self.frames.extend(&self.read_buf[..n]);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("buffered", &self.frames.len())
            .field("policy", &self.policy)
            .field("in_flight", &self.in_flight)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Run `fut` under an optional timeout and cancellation token.
async fn bounded<F, T>(
    operation: &'static str,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let timed = async {
        match timeout {
            Some(after) => match tokio::time::timeout(after, fut).await {
                Ok(result) => result,
                Err(_) => Err(CubeError::Timeout { operation, after }),
            },
            None => fut.await,
        }
    };

    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(CubeError::Cancelled),
            result = timed => result,
        },
        None => timed.await,
    }
}

/// Open a TCP connection, bounded by `timeout`.
pub async fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let connect = async { TcpStream::connect((host, port)).await.map_err(CubeError::from) };
    let stream = bounded("connect", timeout, None, connect).await?;
    stream.set_nodelay(true)?;

    tracing::debug!(host, port, "connected");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, MessageType};
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_read_fragmented_frames() {
        let (client, mut server) = duplex(64);
        let mut conn = Connection::new(client);

        let mut bytes = build_frame(MessageType::QueryComplete.as_u8(), &7u64.to_be_bytes()).unwrap();
        bytes.extend(build_frame(MessageType::Error.as_u8(), b"oops").unwrap());

        let writer = tokio::spawn(async move {
            for piece in bytes.chunks(3) {
                server.write_all(piece).await.unwrap();
                tokio::task::yield_now().await;
            }
            server
        });

        assert_eq!(
            conn.read_message().await.unwrap(),
            Message::QueryComplete { rows_affected: 7 }
        );
        assert_eq!(
            conn.read_message().await.unwrap(),
            Message::Error {
                message: "oops".to_string()
            }
        );
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_message() {
        let (client, mut server) = duplex(1024);
        let mut conn = Connection::new(client);

        conn.write_message(&Message::Handshake { version: 1 })
            .await
            .unwrap();

        let mut buf = [0u8; 9];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0, 0, 0, 5, 0, 0, 0, 0, 1]);
    }

    #[tokio::test]
    async fn test_eof_mid_frame() {
        let (client, mut server) = duplex(1024);
        let mut conn = Connection::new(client);

        server.write_all(&[0, 0, 0, 10, 6, b'a']).await.unwrap();
        drop(server);

        let err = conn.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            CubeError::ConnectionClosed {
                expected: 10,
                received: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_eof_between_frames() {
        let (client, server) = duplex(1024);
        let mut conn = Connection::new(client);
        drop(server);

        assert!(matches!(
            conn.read_frame().await,
            Err(CubeError::ConnectionClosed {
                expected: 4,
                received: 0
            })
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (client, mut server) = duplex(1024);
        let mut conn = Connection::with_max_frame_length(client, 16);

        server.write_all(&[0, 0, 1, 0]).await.unwrap();

        assert!(matches!(
            conn.read_frame().await,
            Err(CubeError::FrameTooLarge { length: 256, max: 16 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_poisons() {
        let (client, _server) = duplex(1024);
        let mut conn = Connection::new(client);
        conn.set_policy(IoPolicy {
            timeout: Some(Duration::from_secs(5)),
            cancel: None,
        });

        assert!(matches!(
            conn.read_frame().await,
            Err(CubeError::Timeout {
                operation: "read frame",
                ..
            })
        ));
        assert!(conn.is_poisoned());
        assert!(matches!(
            conn.read_frame().await,
            Err(CubeError::SessionPoisoned)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_read() {
        let (client, _server) = duplex(1024);
        let mut conn = Connection::new(client);
        let token = CancellationToken::new();
        conn.set_policy(IoPolicy {
            timeout: None,
            cancel: Some(token.clone()),
        });
        token.cancel();

        assert!(matches!(conn.read_frame().await, Err(CubeError::Cancelled)));
        assert!(conn.is_poisoned());
    }

    #[tokio::test]
    async fn test_close_releases_stream() {
        let (client, mut server) = duplex(64);
        let mut conn = Connection::new(client);

        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());

        let mut buf = [0u8; 1];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
        // Both halves are gone, not only the write half.
        assert!(server.write_all(b"late").await.is_err());

        assert!(matches!(conn.read_frame().await, Err(CubeError::SessionClosed)));
        assert!(matches!(
            conn.write_message(&Message::Handshake { version: 1 }).await,
            Err(CubeError::SessionClosed)
        ));
        assert!(!conn.is_poisoned());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_read_poisons() {
        let (client, _server) = duplex(1024);
        let mut conn = Connection::new(client);

        let abandoned = tokio::time::timeout(Duration::from_millis(10), conn.read_frame()).await;
        assert!(abandoned.is_err());

        assert!(matches!(
            conn.write_message(&Message::Handshake { version: 1 }).await,
            Err(CubeError::SessionPoisoned)
        ));
    }
}
