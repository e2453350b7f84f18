//! Session
//!
//! Per-connection state bridging the raw transport and the command
//! router: identity, informational status flag, the bounded outbound
//! queue, heartbeat/timeout durations, a private sub-pool of reusable
//! messages, and traffic counters.
//!
//! A session is owned by its connection's task pair for the lifetime of
//! the connection and by the engine's session pool otherwise. It is
//! rebound to a new connection through [`Session::initialize`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::pool::{Pool, Reusable};
use crate::protocol::{encode_frame, Message};
use crate::Result;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Session lifecycle status. Informational only: the API does not
/// reject operations on a closed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionStatus {
    Closed = 0,
    Waiting = 1,
    LogOn = 2,
}

impl SessionStatus {
    fn from_u8(raw: u8) -> SessionStatus {
        match raw {
            1 => SessionStatus::Waiting,
            2 => SessionStatus::LogOn,
            _ => SessionStatus::Closed,
        }
    }
}

/// Timer and queue parameters applied to a session on initialization.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub timer_interval: Duration,
    pub recv_timeout: Duration,
    pub send_timeout: Duration,
    pub send_queue_len: usize,
}

/// Traffic counters snapshot for one session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub frames_in: u64,
    pub bytes_in: u64,
    pub frames_out: u64,
    pub bytes_out: u64,
}

/// Per-connection state, recycled through the engine's session pool.
pub struct Session {
    id: u64,
    uuid: Uuid,
    peer_addr: Option<SocketAddr>,
    status: AtomicU8,
    outbound: Option<mpsc::Sender<Bytes>>,
    sequence: AtomicU32,

    timer_interval: Duration,
    recv_timeout: Duration,
    send_timeout: Duration,

    msg_pool: Pool<Message>,

    frames_in: AtomicU64,
    bytes_in: AtomicU64,
    frames_out: AtomicU64,
    bytes_out: AtomicU64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            id: 0,
            uuid: Uuid::nil(),
            peer_addr: None,
            status: AtomicU8::new(SessionStatus::Closed as u8),
            outbound: None,
            sequence: AtomicU32::new(0),
            timer_interval: Duration::ZERO,
            recv_timeout: Duration::ZERO,
            send_timeout: Duration::ZERO,
            msg_pool: Pool::new(),
            frames_in: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            frames_out: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        }
    }
}

impl Session {
    /// Bind this session to a new connection: assign a fresh identity,
    /// allocate a fresh outbound queue and message sub-pool, and arm
    /// the configured timer durations. Returns the receiving end of the
    /// outbound queue, consumed by the connection's send loop.
    pub fn initialize(
        &mut self,
        peer_addr: Option<SocketAddr>,
        config: &SessionConfig,
    ) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(config.send_queue_len.max(1));

        self.id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        self.uuid = Uuid::new_v4();
        self.peer_addr = peer_addr;
        self.outbound = Some(tx);
        self.sequence.store(0, Ordering::Relaxed);
        self.timer_interval = config.timer_interval;
        self.recv_timeout = config.recv_timeout;
        self.send_timeout = config.send_timeout;
        self.msg_pool = Pool::new();
        self.frames_in.store(0, Ordering::Relaxed);
        self.bytes_in.store(0, Ordering::Relaxed);
        self.frames_out.store(0, Ordering::Relaxed);
        self.bytes_out.store(0, Ordering::Relaxed);
        self.status
            .store(SessionStatus::Waiting as u8, Ordering::Release);

        rx
    }

    /// Serialize a payload, frame it, and enqueue it for the send loop.
    ///
    /// Awaits while the outbound queue is full; this is the engine's
    /// only backpressure mechanism and has no timeout of its own.
    pub async fn send<T: Serialize>(&self, command: u32, payload: &T) -> Result<()> {
        let body = bincode::serialize(payload)
            .with_context(|| format!("failed to serialize payload for command {}", command))?;
        self.send_raw(command, &body).await
    }

    /// Frame and enqueue an already-encoded body.
    pub async fn send_raw(&self, command: u32, body: &[u8]) -> Result<()> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or_else(|| anyhow!("session {} not bound to a connection", self.id))?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let frame = encode_frame(command, sequence, body);

        self.frames_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(frame.len() as u64, Ordering::Relaxed);

        tx.send(frame)
            .await
            .map_err(|_| anyhow!("session {} outbound queue closed", self.id))
    }

    /// Whether the session has not been marked closed.
    pub fn is_valid(&self) -> bool {
        self.status() != SessionStatus::Closed
    }

    /// Mark the session closed. Checked opportunistically by callers;
    /// in-flight operations are not interrupted.
    pub fn mark_closed(&self) {
        self.status
            .store(SessionStatus::Closed as u8, Ordering::Release);
    }

    /// Mark the session as logged on (application-level state).
    pub fn mark_logon(&self) {
        self.status
            .store(SessionStatus::LogOn as u8, Ordering::Release);
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Integer session handle, unique for the process lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn timer_interval(&self) -> Duration {
        self.timer_interval
    }

    pub fn recv_timeout(&self) -> Duration {
        self.recv_timeout
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Snapshot of the session's traffic counters.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_inbound(&self, frame_bytes: usize) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(frame_bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn acquire_message(&self) -> Message {
        self.msg_pool.acquire()
    }

    pub(crate) fn release_message(&self, msg: Message) {
        self.msg_pool.release(msg);
    }
}

impl Reusable for Session {
    fn reset(&mut self) {
        self.id = 0;
        self.uuid = Uuid::nil();
        self.peer_addr = None;
        // Dropping the sender closes the queue for any lingering holder.
        self.outbound = None;
        self.sequence.store(0, Ordering::Relaxed);
        self.timer_interval = Duration::ZERO;
        self.recv_timeout = Duration::ZERO;
        self.send_timeout = Duration::ZERO;
        self.msg_pool = Pool::new();
        self.frames_in.store(0, Ordering::Relaxed);
        self.bytes_in.store(0, Ordering::Relaxed);
        self.frames_out.store(0, Ordering::Relaxed);
        self.bytes_out.store(0, Ordering::Relaxed);
        self.status
            .store(SessionStatus::Closed as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Frame, LENGTH_PREFIX_LEN};

    fn test_config(queue_len: usize) -> SessionConfig {
        SessionConfig {
            timer_interval: Duration::from_secs(1),
            recv_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(30),
            send_queue_len: queue_len,
        }
    }

    #[tokio::test]
    async fn test_initialize_sets_waiting_status() {
        let mut session = Session::default();
        assert_eq!(session.status(), SessionStatus::Closed);

        let _rx = session.initialize(None, &test_config(8));
        assert_eq!(session.status(), SessionStatus::Waiting);
        assert!(session.is_valid());
        assert!(session.id() > 0);
        assert!(!session.uuid().is_nil());
    }

    #[tokio::test]
    async fn test_send_enqueues_encoded_frames_in_order() {
        let mut session = Session::default();
        let mut rx = session.initialize(None, &test_config(8));

        session.send_raw(10, b"first").await.unwrap();
        session.send_raw(11, b"second").await.unwrap();

        let frame = Frame::decode(&rx.recv().await.unwrap()[LENGTH_PREFIX_LEN..]).unwrap();
        assert_eq!(frame.command, 10);
        assert_eq!(frame.sequence, 0);
        assert_eq!(&frame.body[..], b"first");

        let frame = Frame::decode(&rx.recv().await.unwrap()[LENGTH_PREFIX_LEN..]).unwrap();
        assert_eq!(frame.command, 11);
        assert_eq!(frame.sequence, 1);

        let stats = session.stats();
        assert_eq!(stats.frames_out, 2);
        assert!(stats.bytes_out > 0);
    }

    #[tokio::test]
    async fn test_send_without_initialize_fails() {
        let session = Session::default();
        assert!(session.send_raw(1, b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_pool_recycle_yields_clean_session() {
        let pool: Pool<Session> = Pool::new();

        let mut session = pool.acquire();
        let _rx = session.initialize(None, &test_config(4));
        session.send_raw(5, b"left over").await.unwrap();
        session.mark_logon();
        let first_id = session.id();
        pool.release(session);

        let mut session = pool.acquire();
        assert_eq!(session.status(), SessionStatus::Closed);
        assert_eq!(session.stats().frames_out, 0);

        let mut rx = session.initialize(None, &test_config(4));
        assert_eq!(session.status(), SessionStatus::Waiting);
        assert_ne!(session.id(), first_id);
        // The fresh queue holds nothing from the prior connection.
        assert!(rx.try_recv().is_err());
    }
}
