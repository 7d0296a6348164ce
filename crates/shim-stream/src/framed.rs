//! # Framed Transport
//!
//! Length-prefixed frames over any byte stream (TCP, Unix socket, duplex pipe).
//!
//! ```text
//! ┌────────────────┬──────────────────────────────────┐
//! │ len: u32 (BE)  │ bincode(ChaincodeMessage)        │
//! └────────────────┴──────────────────────────────────┘
//! ```

use crate::errors::TransportError;
use crate::transport::Transport;
use crate::DEFAULT_MAX_FRAME_SIZE;
use async_trait::async_trait;
use shim_types::{decode, encode, ChaincodeMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace, warn};

type BoxedReader = Box<dyn AsyncRead + Unpin + Send + Sync>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send + Sync>;

/// Transport writing length-prefixed bincode frames to a byte stream.
pub struct FramedTransport {
    reader: AsyncMutex<BoxedReader>,
    writer: Arc<AsyncMutex<BoxedWriter>>,
    max_frame_size: usize,
    closed: AtomicBool,
}

impl FramedTransport {
    /// Wrap a split reader/writer pair.
    pub fn from_split<R, W>(reader: R, writer: W, max_frame_size: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + Sync + 'static,
        W: AsyncWrite + Unpin + Send + Sync + 'static,
    {
        Self {
            reader: AsyncMutex::new(Box::new(reader)),
            writer: Arc::new(AsyncMutex::new(Box::new(writer))),
            max_frame_size,
            closed: AtomicBool::new(false),
        }
    }

    /// Wrap a single bidirectional stream.
    pub fn new<S>(stream: S, max_frame_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_split(reader, writer, max_frame_size)
    }

    /// Connect to a peer over TCP.
    pub async fn connect(addr: &str, max_frame_size: usize) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(addr = addr, "Connected to peer");
        let (reader, writer) = stream.into_split();
        Ok(Self::from_split(reader, writer, max_frame_size))
    }

    /// Two connected endpoints over an in-memory byte pipe.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            Self::new(a, DEFAULT_MAX_FRAME_SIZE),
            Self::new(b, DEFAULT_MAX_FRAME_SIZE),
        )
    }
}

#[async_trait]
impl Transport for FramedTransport {
    async fn send_frame(&self, frame: ChaincodeMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let bytes = encode(&frame)?;
        if bytes.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: bytes.len(),
                max: self.max_frame_size,
            });
        }
        let len = u32::try_from(bytes.len()).map_err(|_| TransportError::FrameTooLarge {
            size: bytes.len(),
            max: u32::MAX as usize,
        })?;

        let mut writer = self.writer.lock().await;
        writer.write_u32(len).await?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        trace!(msg_type = %frame.msg_type, len = len, "Frame written");
        Ok(())
    }

    async fn recv_frame(&self) -> Result<ChaincodeMessage, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut reader = self.reader.lock().await;
        let len = reader.read_u32().await? as usize;
        if len > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        Ok(decode(&buf)?)
    }

    /// Shuts down the write half so the peer sees EOF. The shutdown runs on
    /// the current runtime once any in-flight write releases the writer.
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime to shut down the writer, leaving it to drop");
            return;
        };
        let writer = Arc::clone(&self.writer);
        runtime.spawn(async move {
            if let Err(e) = writer.lock().await.shutdown().await {
                warn!(error = %e, "Writer shutdown failed");
            }
        });
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
