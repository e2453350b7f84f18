//! Framelink Library
//!
//! A minimal TCP connection engine built on a length-prefixed binary
//! framing protocol. Provides command-based message routing, a pair of
//! cooperating send/receive tasks per connection, heartbeat and
//! idle-timeout supervision, and pooled Session/Message recycling.
//!
//! The engine is symmetric: the same type serves as listener or dialer
//! over one network address.

pub mod commands;
pub mod config;
pub mod engine;
pub mod pool;
pub mod protocol;
pub mod router;
pub mod session;
pub mod shutdown;

pub use config::Config;
pub use engine::{Engine, EngineCallbacks};
pub use router::CommandRouter;
pub use session::Session;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the connection engine
pub type Result<T> = anyhow::Result<T>;
