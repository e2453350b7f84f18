//! Per-connection task pair.
//!
//! Each established connection runs exactly two cooperating tasks: a
//! receive loop reading and dispatching frames, and a send loop
//! draining the session's outbound queue and servicing the heartbeat
//! timer. Both are joined under a connection-scoped cancellation token
//! (a child of the run-wide token); whichever loop exits first cancels
//! the token and the send loop additionally closes the transport,
//! which drives the sibling to termination.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ConnShared;
use crate::protocol::{FRAME_HEADER_LEN, LENGTH_PREFIX_LEN};
use crate::session::Session;
use crate::Result;

/// Consecutive partial writes tolerated before the connection is
/// considered wedged.
const MAX_PARTIAL_WRITES: u32 = 3;

/// Drive one connection from establishment to close: bind a pooled
/// session, fire lifecycle callbacks, run the task pair, and recycle
/// the session once both tasks have finished.
pub(crate) async fn handle_connection(
    shared: Arc<ConnShared>,
    stream: TcpStream,
    run: CancellationToken,
) {
    let peer_addr = stream.peer_addr().ok();

    let mut session = shared.session_pool.acquire();
    let outbound_rx = session.initialize(peer_addr, &shared.session_config());
    let session = Arc::new(session);

    shared.registry.insert(&session).await;
    info!(session_id = session.id(), peer = ?peer_addr, "Connection established");

    if let Some(cb) = &shared.callbacks.on_connect {
        if let Err(e) = cb(Arc::clone(&session)).await {
            warn!(session_id = session.id(), "On-connect callback failed: {:#}", e);
        }
    }

    let conn = run.child_token();
    let (read_half, write_half) = stream.into_split();

    let send_task = tokio::spawn(send_loop(
        write_half,
        outbound_rx,
        Arc::clone(&session),
        Arc::clone(&shared),
        run.clone(),
        conn.clone(),
    ));
    let recv_task = tokio::spawn(recv_loop(
        read_half,
        Arc::clone(&session),
        Arc::clone(&shared),
        run,
        conn,
    ));

    let (send_result, recv_result) = tokio::join!(send_task, recv_task);
    for result in [send_result, recv_result] {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(session_id = session.id(), "Connection task ended: {:#}", e);
            }
            Err(e) => {
                error!(session_id = session.id(), "Connection task panicked: {}", e);
            }
        }
    }

    session.mark_closed();
    if let Some(cb) = &shared.callbacks.on_closed {
        if let Err(e) = cb(Arc::clone(&session)).await {
            warn!(session_id = session.id(), "On-closed callback failed: {:#}", e);
        }
    }

    shared.registry.remove(session.id()).await;
    let stats = session.stats();
    info!(
        session_id = session.id(),
        frames_in = stats.frames_in,
        frames_out = stats.frames_out,
        bytes_in = stats.bytes_in,
        bytes_out = stats.bytes_out,
        "Connection closed"
    );

    match Arc::try_unwrap(session) {
        Ok(session) => shared.session_pool.release(session),
        Err(session) => {
            debug!(session_id = session.id(), "Session still referenced, not recycled");
        }
    }
}

/// Send loop: waits on run-wide cancellation, connection cancellation,
/// the next queued frame, or heartbeat expiry, with no fixed priority.
async fn send_loop(
    mut write: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Bytes>,
    session: Arc<Session>,
    shared: Arc<ConnShared>,
    run: CancellationToken,
    conn: CancellationToken,
) -> Result<()> {
    let result = pump_outbound(&mut write, &mut outbound, &session, &shared, &run, &conn).await;

    // Closing the transport here is what unblocks the paired receive
    // loop's read and drives the connection to Closed.
    conn.cancel();
    let _ = write.shutdown().await;
    debug!(session_id = session.id(), "Send loop done");
    result
}

async fn pump_outbound(
    write: &mut OwnedWriteHalf,
    outbound: &mut mpsc::Receiver<Bytes>,
    session: &Arc<Session>,
    shared: &Arc<ConnShared>,
    run: &CancellationToken,
    conn: &CancellationToken,
) -> Result<()> {
    let send_timeout = session.send_timeout();
    let heartbeat = !session.timer_interval().is_zero();
    let period = if heartbeat {
        session.timer_interval()
    } else {
        Duration::from_secs(3600)
    };
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = run.cancelled() => return Ok(()),
            _ = conn.cancelled() => return Ok(()),
            frame = outbound.recv() => {
                let frame = frame.ok_or_else(|| anyhow!("outbound queue closed"))?;
                write_frame(write, &frame, send_timeout).await?;
            }
            _ = ticker.tick(), if heartbeat => {
                if let Some(cb) = &shared.callbacks.on_timeout {
                    if let Err(e) = cb(Arc::clone(session)).await {
                        warn!(session_id = session.id(), "On-timeout callback failed: {:#}", e);
                    }
                }
            }
        }
    }
}

/// Write one encoded frame, retrying on partial writes. Aborts after
/// three consecutive partial attempts or when the per-write deadline
/// (if positive) expires.
async fn write_frame(
    write: &mut OwnedWriteHalf,
    mut buf: &[u8],
    send_timeout: Duration,
) -> Result<()> {
    let mut partial_attempts = 0u32;

    while !buf.is_empty() {
        let written = if send_timeout.is_zero() {
            write.write(buf).await.context("transport write failed")?
        } else {
            match time::timeout(send_timeout, write.write(buf)).await {
                Ok(result) => result.context("transport write failed")?,
                Err(_) => bail!("write timed out after {:?}", send_timeout),
            }
        };

        if written == 0 {
            bail!("transport closed during write");
        }

        buf = &buf[written..];
        if !buf.is_empty() {
            partial_attempts += 1;
            if partial_attempts >= MAX_PARTIAL_WRITES {
                bail!("aborting after {} partial write attempts", MAX_PARTIAL_WRITES);
            }
        }
    }

    Ok(())
}

/// Receive loop: reads length-prefixed frames and dispatches them
/// through the router. Cancellation is observed between read attempts.
async fn recv_loop(
    mut read: OwnedReadHalf,
    session: Arc<Session>,
    shared: Arc<ConnShared>,
    run: CancellationToken,
    conn: CancellationToken,
) -> Result<()> {
    let result = recv_frames(&mut read, &session, &shared, &run, &conn).await;
    conn.cancel();
    debug!(session_id = session.id(), "Receive loop done");
    result
}

async fn recv_frames(
    read: &mut OwnedReadHalf,
    session: &Arc<Session>,
    shared: &Arc<ConnShared>,
    run: &CancellationToken,
    conn: &CancellationToken,
) -> Result<()> {
    let recv_timeout = session.recv_timeout();
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
    // Scratch buffer grows on demand but never shrinks.
    let mut scratch = vec![0u8; shared.config.default_frame_len.max(FRAME_HEADER_LEN)];

    loop {
        let completed = tokio::select! {
            _ = run.cancelled() => return Ok(()),
            _ = conn.cancelled() => return Ok(()),
            result = read_exact_with_deadline(read, &mut len_buf, recv_timeout) => result?,
        };
        if !completed {
            // Deadline expired while idle; transient, re-attempt.
            continue;
        }

        let frame_len = u32::from_be_bytes(len_buf) as usize;
        if frame_len > shared.config.max_frame_len {
            bail!(
                "frame length {} exceeds maximum {}",
                frame_len,
                shared.config.max_frame_len
            );
        }
        if frame_len < FRAME_HEADER_LEN {
            bail!("frame length {} below header size {}", frame_len, FRAME_HEADER_LEN);
        }

        if frame_len > scratch.len() {
            scratch.resize(frame_len, 0);
        }

        // A deadline expiry mid-frame is corrupt traffic, not idleness.
        if !read_exact_with_deadline(read, &mut scratch[..frame_len], recv_timeout).await? {
            bail!("timed out reading frame body ({} bytes)", frame_len);
        }

        session.record_inbound(LENGTH_PREFIX_LEN + frame_len);

        let mut msg = session.acquire_message();
        msg.decode_from(&scratch[..frame_len])?;

        match shared.router.get(msg.command) {
            None => {
                warn!(
                    session_id = session.id(),
                    command = msg.command,
                    "Dropping frame for unroutable command"
                );
            }
            Some(entry) => {
                // Decode failures and handler errors are logged and
                // dropped; the connection stays open.
                if let Err(e) = entry.dispatch(Arc::clone(session), msg.body()).await {
                    warn!(
                        session_id = session.id(),
                        command = msg.command,
                        "Message dropped: {:#}",
                        e
                    );
                }
            }
        }

        session.release_message(msg);
    }
}

/// Read exactly `buf.len()` bytes, bounded by `deadline` when positive.
/// Returns `Ok(false)` if the deadline expired, `Ok(true)` on a
/// complete read.
async fn read_exact_with_deadline(
    read: &mut OwnedReadHalf,
    buf: &mut [u8],
    deadline: Duration,
) -> Result<bool> {
    if deadline.is_zero() {
        read.read_exact(buf).await.context("transport read failed")?;
        return Ok(true);
    }

    match time::timeout(deadline, read.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(true),
        Ok(Err(e)) => Err(anyhow!(e).context("transport read failed")),
        Err(_) => Ok(false),
    }
}
