//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub shutdown: ShutdownConfig,
}

/// Connection engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Address to listen on or dial, depending on role.
    pub bind_addr: SocketAddr,
    /// Heartbeat timer interval for the send loop.
    #[serde(with = "humantime_serde")]
    pub timer_interval: Duration,
    /// Read deadline per receive attempt; zero disables the deadline
    /// (and with it, bounded shutdown latency for idle connections).
    #[serde(with = "humantime_serde")]
    pub recv_timeout: Duration,
    /// Write deadline per frame write; zero disables the deadline.
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
    /// New connections are dropped while this many sessions are active.
    pub max_connections: usize,
    /// Initial size of the receive scratch buffer.
    pub default_frame_len: usize,
    /// Frames declaring a length above this terminate the connection.
    pub max_frame_len: usize,
    /// Capacity of each session's outbound queue.
    pub send_queue_len: usize,
}

/// Graceful shutdown configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShutdownConfig {
    /// How long to wait for active sessions to drain after the
    /// termination signal.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                bind_addr: "127.0.0.1:8888".parse().unwrap(),
                timer_interval: Duration::from_secs(1),
                recv_timeout: Duration::from_secs(30),
                send_timeout: Duration::from_secs(30),
                max_connections: 1000,
                default_frame_len: 4096,
                max_frame_len: 65536,
                send_queue_len: 64,
            },
            shutdown: ShutdownConfig {
                timeout: Duration::from_secs(30),
            },
        }
    }
}
