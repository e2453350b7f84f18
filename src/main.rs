//! Framelink - Length-prefixed TCP connection engine
//!
//! Demo binary wiring the engine to the login/heartbeat command module.
//! Runs the same engine as listener or dialer over one address.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use framelink::commands::login::{
    self, Heartbeat, LoginRequest, CMD_HEARTBEAT_REQ, CMD_LOGIN_REQ,
};
use framelink::config::ConfigManager;
use framelink::engine::EngineCallbacks;
use framelink::{CommandRouter, Engine, ShutdownCoordinator};

/// Which side of the connection this process plays.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    Server,
    Client,
}

/// CLI arguments for Framelink
#[derive(Parser, Debug)]
#[command(name = "framelink")]
#[command(about = "Framelink - length-prefixed TCP connection engine")]
#[command(version)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Run as listener or dialer
    #[arg(long, value_enum, default_value_t = Role::Server)]
    pub role: Role,

    /// Address override (e.g. 127.0.0.1:8888)
    #[arg(short, long)]
    pub addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!("Starting Framelink v{}", env!("CARGO_PKG_VERSION"));

    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    if let Some(addr) = args.addr.as_deref() {
        config.network.bind_addr = addr
            .parse()
            .with_context(|| format!("Invalid address: {}", addr))?;
    }

    ConfigManager::validate(&config).context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Address: {}", config.network.bind_addr);
        info!("  Max connections: {}", config.network.max_connections);
        info!("  Timer interval: {:?}", config.network.timer_interval);
        info!("  Recv timeout: {:?}", config.network.recv_timeout);
        info!("  Send queue length: {}", config.network.send_queue_len);
        return Ok(());
    }

    match args.role {
        Role::Server => run_server(config).await,
        Role::Client => run_client(config).await,
    }
}

async fn run_server(config: framelink::Config) -> Result<()> {
    let mut router = CommandRouter::new();
    login::register_server(&mut router);

    let callbacks = EngineCallbacks::new()
        .on_connect(|session| async move {
            info!(session_id = session.id(), peer = ?session.peer_addr(), "Peer connected");
            Ok(())
        })
        .on_closed(|session| async move {
            info!(session_id = session.id(), "Peer disconnected");
            Ok(())
        });

    let engine = Arc::new(Engine::new(config.network, router, callbacks));
    let coordinator = ShutdownCoordinator::new(engine.cancellation_token(), config.shutdown.timeout);

    let server = Arc::clone(&engine);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            error!("Server error: {:#}", e);
        }
    });

    info!("Framelink server started; press Ctrl+C or send SIGTERM to shut down");

    coordinator.listen_for_signals().await?;
    coordinator.wait_for_drain(&engine).await?;

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Server task failed: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn run_client(config: framelink::Config) -> Result<()> {
    let mut router = CommandRouter::new();
    login::register_client(&mut router);

    let callbacks = EngineCallbacks::new()
        .on_connect(|session| async move {
            info!(session_id = session.id(), "Connected, sending login");
            session
                .send(
                    CMD_LOGIN_REQ,
                    &LoginRequest {
                        account: "dio".to_string(),
                    },
                )
                .await
        })
        .on_timeout(|session| async move {
            session.send(CMD_HEARTBEAT_REQ, &Heartbeat {}).await
        })
        .on_closed(|session| async move {
            info!(session_id = session.id(), "Connection closed");
            Ok(())
        });

    let engine = Arc::new(Engine::new(config.network, router, callbacks));
    let coordinator = ShutdownCoordinator::new(engine.cancellation_token(), config.shutdown.timeout);

    if let Err(e) = engine.connect(Some(Duration::from_secs(5))).await {
        warn!("Connect failed (no automatic retry): {:#}", e);
        return Err(e);
    }

    coordinator.listen_for_signals().await?;
    coordinator.wait_for_drain(&engine).await?;

    info!("Client shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
