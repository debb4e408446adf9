use std::net::SocketAddr;

use bytebuffer::ByteBuffer;
use tokio::net::UdpSocket;
use tokio::{spawn, task};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::Result;
use crate::events::{EventBus, TelloEvent};

pub const VIDEO_WIDTH: u32 = 960;
pub const VIDEO_HEIGHT: u32 = 720;

/// Size of every video datagram but the last one of a frame.
pub const MAX_CHUNK_SIZE: usize = 1460;

const RECEIVE_BUFFER_SIZE: usize = 2048;

/// A frame of h264 encoded video from the drone.
#[derive(Debug, Clone, PartialEq)]
pub struct TelloVideoFrame {
    pub data: Vec<u8>,
}

/// Joins video datagrams back into frames.
///
/// A chunk of exactly [`MAX_CHUNK_SIZE`] bytes means more of the frame
/// follows, anything else ends it. There is no way to tell a frame whose last
/// chunk is exactly that size, or whose last chunk was lost, from the start
/// of the next frame: both get merged with the following frame.
pub struct FrameAssembler {
    buf: ByteBuffer,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAssembler").field("pending", &self.buf.len()).finish()
    }
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self { buf: ByteBuffer::new() }
    }

    /// Adds a received chunk, returning the frame if it was the last one.
    pub fn push(&mut self, chunk: &[u8]) -> Option<TelloVideoFrame> {
        self.buf.write_bytes(chunk);

        if chunk.len() == MAX_CHUNK_SIZE || self.buf.len() == 0 {
            return None;
        }

        let data = std::mem::replace(&mut self.buf, ByteBuffer::new()).into_vec();
        Some(TelloVideoFrame { data })
    }

    /// Bytes of the frame received so far.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[derive(Debug)]
pub(crate) struct VideoListener {
    local_address: SocketAddr,
    task: task::JoinHandle<()>,
}

impl VideoListener {
    pub(crate) async fn start_listening(
        address: SocketAddr,
        events: EventBus,
        scope: CancellationToken,
    ) -> Result<Self> {
        let sock = UdpSocket::bind(address).await?;
        let local_address = sock.local_addr()?;
        info!("[Video] START LISTENING at {local_address}");

        let task = spawn(async move {
            let mut assembler = FrameAssembler::new();
            let mut chunk = vec![0; RECEIVE_BUFFER_SIZE];
            loop {
                let received = tokio::select! {
                    _ = scope.cancelled() => break,
                    r = sock.recv(&mut chunk) => r,
                };

                match received {
                    Ok(n) => {
                        if let Some(frame) = assembler.push(&chunk[..n]) {
                            events.dispatch(TelloEvent::VideoPacket(frame));
                        }
                    }
                    Err(_) if scope.is_cancelled() => break,
                    Err(err) => warn!("[Video] reading video failed: {err}"),
                }
            }
        });

        Ok(Self { local_address, task })
    }

    pub(crate) fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    pub(crate) async fn stop_listening(self) {
        info!("[Video] STOP LISTENING");
        if let Err(err) = self.task.await {
            warn!("[Video] listener task failed: {err}");
        }
    }
}
