//! Connection Engine
//!
//! Accept/dial orchestration and per-connection lifecycle. The engine
//! is symmetric: `serve` runs a listening role over the configured
//! address, `connect` performs a single dial. Either way each
//! established connection gets one pooled session and a pair of
//! cooperating send/receive tasks under the run-wide cancellation
//! scope (see [`conn`]).

mod conn;

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::NetworkConfig;
use crate::pool::Pool;
use crate::router::{CommandRouter, HandlerFuture};
use crate::session::{Session, SessionConfig};
use crate::Result;

/// Lifecycle callback invoked with the active session. The outcome is
/// logged but never aborts the connection.
pub type LifecycleCallback = Arc<dyn Fn(Arc<Session>) -> HandlerFuture + Send + Sync>;

/// Lifecycle callbacks, set at engine construction. At most one of each.
#[derive(Clone, Default)]
pub struct EngineCallbacks {
    pub(crate) on_connect: Option<LifecycleCallback>,
    pub(crate) on_closed: Option<LifecycleCallback>,
    pub(crate) on_timeout: Option<LifecycleCallback>,
}

impl EngineCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fired once per connection after session initialization.
    pub fn on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_connect = Some(Arc::new(move |session| Box::pin(f(session))));
        self
    }

    /// Fired exactly once when both connection tasks have finished.
    pub fn on_closed<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_closed = Some(Arc::new(move |session| Box::pin(f(session))));
        self
    }

    /// Fired on each heartbeat timer expiry, typically to emit a
    /// heartbeat frame.
    pub fn on_timeout<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_timeout = Some(Arc::new(move |session| Box::pin(f(session))));
        self
    }
}

/// Observational record of one active session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: u64,
    pub uuid: Uuid,
    pub peer_addr: Option<SocketAddr>,
    pub start_time: Instant,
}

/// Tracks active sessions for counting and inspection only; never used
/// for broadcast or forced disconnect.
pub(crate) struct SessionRegistry {
    active: AtomicUsize,
    sessions: RwLock<HashMap<u64, SessionInfo>>,
}

impl SessionRegistry {
    fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn insert(&self, session: &Session) {
        let info = SessionInfo {
            id: session.id(),
            uuid: session.uuid(),
            peer_addr: session.peer_addr(),
            start_time: Instant::now(),
        };
        self.active.fetch_add(1, Ordering::Relaxed);
        self.sessions.write().await.insert(info.id, info);
    }

    pub(crate) async fn remove(&self, id: u64) {
        if self.sessions.write().await.remove(&id).is_some() {
            self.active.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    async fn snapshot(&self) -> Vec<SessionInfo> {
        self.sessions.read().await.values().cloned().collect()
    }
}

/// State shared by the engine and every connection task pair.
pub(crate) struct ConnShared {
    pub(crate) config: NetworkConfig,
    pub(crate) router: Arc<CommandRouter>,
    pub(crate) callbacks: EngineCallbacks,
    pub(crate) session_pool: Pool<Session>,
    pub(crate) registry: SessionRegistry,
}

impl ConnShared {
    pub(crate) fn session_config(&self) -> SessionConfig {
        SessionConfig {
            timer_interval: self.config.timer_interval,
            recv_timeout: self.config.recv_timeout,
            send_timeout: self.config.send_timeout,
            send_queue_len: self.config.send_queue_len,
        }
    }
}

/// The connection engine. Holds the address, router, session pool,
/// observational session registry, configured defaults, and lifecycle
/// callbacks.
pub struct Engine {
    addr: SocketAddr,
    shared: Arc<ConnShared>,
    cancel: CancellationToken,
}

impl Engine {
    /// Create an engine. The router must be fully populated before this
    /// point; it is read-only from here on.
    pub fn new(config: NetworkConfig, router: CommandRouter, callbacks: EngineCallbacks) -> Self {
        let addr = config.bind_addr;
        Self {
            shared: Arc::new(ConnShared {
                config,
                router: Arc::new(router),
                callbacks,
                session_pool: Pool::new(),
                registry: SessionRegistry::new(),
            }),
            addr,
            cancel: CancellationToken::new(),
        }
    }

    /// The address this engine listens on or dials.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The run-wide cancellation token; cancelling it closes every
    /// active connection.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Trigger run-wide cancellation.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Number of currently active sessions.
    pub fn active_sessions(&self) -> usize {
        self.shared.registry.active()
    }

    /// Snapshot of active session records.
    pub async fn session_infos(&self) -> Vec<SessionInfo> {
        self.shared.registry.snapshot().await
    }

    /// Bind the configured address and accept connections until the
    /// run-wide scope is cancelled.
    pub async fn serve(&self) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.addr))?;
        info!("Listening on {}", self.addr);
        self.serve_listener(listener).await
    }

    /// Accept connections on an already-bound listener. Split out so
    /// embedders can bind port 0 and learn the address first.
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Run-wide cancellation observed, stopping accept loop");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if self.shared.registry.active() >= self.shared.config.max_connections {
                                warn!(peer = %peer, "Connection limit reached, dropping connection");
                                continue;
                            }
                            debug!(peer = %peer, "Accepted connection");
                            tokio::spawn(conn::handle_connection(
                                Arc::clone(&self.shared),
                                stream,
                                self.cancel.clone(),
                            ));
                        }
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Perform a single dial to the configured address, optionally
    /// bounded by a timeout, and spawn the connection task pair.
    /// Failures are logged and returned; retry is the caller's
    /// responsibility.
    pub async fn connect(&self, connect_timeout: Option<Duration>) -> Result<()> {
        let stream = match connect_timeout {
            Some(limit) => match time::timeout(limit, TcpStream::connect(self.addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!("Dial to {} failed: {}", self.addr, e);
                    return Err(e.into());
                }
                Err(_) => {
                    warn!("Dial to {} timed out after {:?}", self.addr, limit);
                    bail!("dial to {} timed out after {:?}", self.addr, limit);
                }
            },
            None => match TcpStream::connect(self.addr).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Dial to {} failed: {}", self.addr, e);
                    return Err(e.into());
                }
            },
        };

        info!(peer = %self.addr, "Dialed connection");
        tokio::spawn(conn::handle_connection(
            Arc::clone(&self.shared),
            stream,
            self.cancel.clone(),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_engine_creation() {
        let config = Config::default();
        let engine = Engine::new(config.network, CommandRouter::new(), EngineCallbacks::new());

        assert_eq!(engine.active_sessions(), 0);
        assert!(engine.session_infos().await.is_empty());
        assert_eq!(engine.addr().port(), 8888);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_token() {
        let config = Config::default();
        let engine = Engine::new(config.network, CommandRouter::new(), EngineCallbacks::new());

        let token = engine.cancellation_token();
        assert!(!token.is_cancelled());
        engine.shutdown();
        assert!(token.is_cancelled());
    }
}
