//! Application Commands
//!
//! Demo command modules layered on top of the engine. The engine core
//! knows nothing about these; they are registered onto a
//! [`CommandRouter`](crate::router::CommandRouter) before serving
//! starts.

pub mod login;
