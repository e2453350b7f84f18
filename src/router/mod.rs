//! Command Router
//!
//! Maps a command id to a single capability bundling payload decoding
//! and handling. The registry is populated before serving begins and is
//! read concurrently by every connection afterwards without locking.
//!
//! Handlers are invoked inline by the receive loop; a handler that
//! awaits `Session::send` therefore stalls inbound processing for that
//! connection while the outbound queue is full.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;

use crate::session::Session;
use crate::Result;

/// Boxed future returned by command handlers and lifecycle callbacks.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A registered command: decodes its payload and handles the result.
pub trait CommandHandler: Send + Sync {
    /// Decode `body` and run the handler. A decode failure returns an
    /// error without invoking the handler; the caller logs and drops
    /// the message either way.
    fn dispatch(&self, session: Arc<Session>, body: &[u8]) -> HandlerFuture;
}

/// Adapter pairing a typed payload with its handler function.
struct TypedCommand<T, F> {
    command: u32,
    handler: F,
    _payload: PhantomData<fn(T)>,
}

impl<T, F, Fut> CommandHandler for TypedCommand<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(Arc<Session>, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn dispatch(&self, session: Arc<Session>, body: &[u8]) -> HandlerFuture {
        let payload: T = match bincode::deserialize(body)
            .with_context(|| format!("failed to decode payload for command {}", self.command))
        {
            Ok(payload) => payload,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        Box::pin((self.handler)(session, payload))
    }
}

/// Registry of command handlers, write-once then read-only.
#[derive(Default)]
pub struct CommandRouter {
    entries: HashMap<u32, Box<dyn CommandHandler>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler and payload type for a command id. A later
    /// registration for the same id replaces the earlier one.
    pub fn register<T, F, Fut>(&mut self, command: u32, handler: F)
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Arc<Session>, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.entries.insert(
            command,
            Box::new(TypedCommand {
                command,
                handler,
                _payload: PhantomData,
            }),
        );
    }

    /// Look up the capability for a command id.
    pub fn get(&self, command: u32) -> Option<&dyn CommandHandler> {
        self.entries.get(&command).map(|entry| entry.as_ref())
    }

    pub fn contains(&self, command: u32) -> bool {
        self.entries.contains_key(&command)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
