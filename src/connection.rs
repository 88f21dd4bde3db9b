//! Per-socket connection: handshake, framed reads, single-writer outbound
//! queue, and the inactivity health check.
//!
//! A [`Connection`] owns its socket. [`ConnectionHandle`] is the cheap,
//! cloneable half of it that the room registry stores on each [`Member`]
//! (see `crate::room`) so broadcasts can enqueue a frame without touching
//! the socket directly — mirroring the split between a transport and the
//! handle other parts of this codebase pass around.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::codec;
use crate::error::{ServerError, ServerResult};

const DRAIN_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// The cloneable, send-only half of a connection. Safe to hold from any
/// task (the room registry, the health-check loop, another connection's
/// broadcast) without synchronizing with the connection's own reader.
#[derive(Clone)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
    last_activity: Arc<StdMutex<Instant>>,
}

impl ConnectionHandle {
    /// Enqueues a pre-framed message. Non-blocking: on a full queue or a
    /// closed connection the frame is dropped and `false` is returned; the
    /// caller logs once and moves on rather than tearing anything down.
    pub fn try_send(&self, frame: Vec<u8>) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.sender.try_send(frame).is_ok()
    }

    pub fn touch(&self) {
        if let Ok(mut guard) = self.last_activity.lock() {
            *guard = Instant::now();
        }
    }

    pub fn is_idle_for(&self, threshold: Duration) -> bool {
        match self.last_activity.lock() {
            Ok(guard) => guard.elapsed() >= threshold,
            Err(_) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn request_close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Reads complete frames off the socket, buffering partial reads across
/// calls. Owned by the per-connection task that drives the session handler.
pub struct FrameReader {
    read_half: OwnedReadHalf,
    buf: Vec<u8>,
    read_timeout: Duration,
}

impl FrameReader {
    /// Reads one complete frame's payload (packet-id byte + body, length
    /// prefix already stripped), or `None` on clean EOF.
    pub async fn read_frame(&mut self) -> ServerResult<Option<Vec<u8>>> {
        loop {
            if let Some((consumed, payload)) = codec::try_extract_frame(&self.buf)? {
                self.buf.drain(..consumed);
                return Ok(Some(payload));
            }
            let mut chunk = [0u8; 4096];
            let n = timeout(self.read_timeout, self.read_half.read(&mut chunk))
                .await
                .map_err(|_| ServerError::ReadTimeout)??;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend(chunk.into_iter().take(n));
        }
    }
}

/// An accepted, handshaken socket, split into its writer task/health loop
/// (owned here) and a [`FrameReader`] handed back to the caller.
pub struct Connection {
    handle: ConnectionHandle,
    writer_task: tokio::task::JoinHandle<()>,
    health_task: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Performs the protocol-version handshake and spins up the writer and
    /// health-check tasks. Returns the connection object, a cloneable
    /// handle, and a reader for the caller's inbound loop.
    pub async fn accept(
        stream: TcpStream,
        handshake_timeout: Duration,
        read_timeout: Duration,
        inactivity_timeout: Duration,
        health_check_interval: Duration,
        send_queue_capacity: usize,
    ) -> ServerResult<(Self, ConnectionHandle, FrameReader)> {
        stream.set_nodelay(true).ok();
        let (mut read_half, write_half) = stream.into_split();

        let mut version = [0u8; 1];
        timeout(handshake_timeout, read_half.read_exact(&mut version))
            .await
            .map_err(|_| ServerError::HandshakeTimeout)??;
        let [version] = version;
        if version != crate::protocol::PROTOCOL_VERSION {
            return Err(ServerError::UnsupportedProtocolVersion(version));
        }

        let (tx, rx) = mpsc::channel(send_queue_capacity);
        let closed = Arc::new(AtomicBool::new(false));
        let last_activity = Arc::new(StdMutex::new(Instant::now()));

        let handle = ConnectionHandle {
            sender: tx,
            closed: closed.clone(),
            last_activity: last_activity.clone(),
        };

        let writer_task = tokio::spawn(run_writer(write_half, rx, closed.clone()));
        let health_task = tokio::spawn(run_health_check(
            handle.clone(),
            inactivity_timeout,
            health_check_interval,
        ));

        let reader = FrameReader {
            read_half,
            buf: Vec::new(),
            read_timeout,
        };

        Ok((
            Self {
                handle: handle.clone(),
                writer_task,
                health_task,
            },
            handle,
            reader,
        ))
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Idempotent close: cancels the writer and health tasks and marks the
    /// connection closed. Socket teardown happens as a side effect of
    /// aborting the writer task (its `TcpStream` half is dropped).
    pub async fn close(&self) {
        if self.handle.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.health_task.abort();
        // Give the writer a brief window to drain what's already queued
        // before it's forcibly aborted.
        let _ = timeout(DRAIN_CLOSE_TIMEOUT, wait_idle(&self.handle)).await;
        self.writer_task.abort();
    }
}

async fn wait_idle(handle: &ConnectionHandle) {
    while handle.sender.capacity() < handle.sender.max_capacity() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn run_writer(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Vec<u8>>,
    closed: Arc<AtomicBool>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(err) = write_half.write_all(&frame).await {
            warn!(error = %err, "connection write failed, closing");
            closed.store(true, Ordering::Release);
            break;
        }
    }
    let _ = timeout(DRAIN_CLOSE_TIMEOUT, write_half.shutdown()).await;
}

async fn run_health_check(
    handle: ConnectionHandle,
    inactivity_timeout: Duration,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if handle.is_closed() {
            return;
        }
        if handle.is_idle_for(inactivity_timeout) {
            debug!("connection idle past threshold, closing");
            handle.request_close();
            return;
        }
    }
}

/// Test-only helper for constructing a [`ConnectionHandle`] without a real
/// socket, used by other modules' test suites (e.g. `crate::room`).
#[cfg(test)]
pub(crate) mod test_support {
    use super::{AtomicBool, Arc, ConnectionHandle, Instant, StdMutex};
    use tokio::sync::mpsc;

    pub fn handle_with_capacity(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = ConnectionHandle {
            sender: tx,
            closed: Arc::new(AtomicBool::new(false)),
            last_activity: Arc::new(StdMutex::new(Instant::now())),
        };
        (handle, rx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn idle_detection_uses_last_activity() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle {
            sender: tx,
            closed: Arc::new(AtomicBool::new(false)),
            last_activity: Arc::new(StdMutex::new(Instant::now() - Duration::from_secs(200))),
        };
        assert!(handle.is_idle_for(Duration::from_secs(120)));
        handle.touch();
        assert!(!handle.is_idle_for(Duration::from_secs(120)));
    }

    #[test]
    fn try_send_fails_once_closed() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle {
            sender: tx,
            closed: Arc::new(AtomicBool::new(false)),
            last_activity: Arc::new(StdMutex::new(Instant::now())),
        };
        handle.request_close();
        assert!(!handle.try_send(vec![1, 2, 3]));
    }

    #[test]
    fn try_send_drops_on_full_queue_without_panicking() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle {
            sender: tx,
            closed: Arc::new(AtomicBool::new(false)),
            last_activity: Arc::new(StdMutex::new(Instant::now())),
        };
        assert!(handle.try_send(vec![1]));
        assert!(!handle.try_send(vec![2]));
    }
}
