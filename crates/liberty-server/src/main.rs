//! liberty-server: SSH port-forwarding gateway.
//!
//! Accepts SSH connections, admits identities listed in the shared store
//! (with a per-identity session quota), and serves `direct-tcpip` tunnels to
//! public destinations while metering the bytes relayed.

mod auth;
mod config;
mod gateway;
mod handler;
mod hostkeys;
mod mirror;
mod server;

use auth::AdmissionController;
use clap::Parser;
use config::{RawSettings, ServerConfig};
use gateway::{DestinationPolicy, TunnelForwarder};
use handler::GatewayContext;
use liberty_core::{RedisStore, StateStore, StoreKeys};
use mirror::{BannerMirror, SharedBanner};
use server::BridgeServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// liberty-server: SSH port-forwarding gateway
#[derive(Parser, Debug)]
#[command(name = "liberty-server", version, about = "SSH port-forwarding gateway")]
struct Cli {
    /// Redis connection URL
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Listen address (`host:port` or `:port`)
    #[arg(long, env = "LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Upstream SOCKS5 proxy for all tunnels (`host:port`)
    #[arg(long, env = "SOCKS_PROXY")]
    socks_proxy: Option<String>,

    /// Directory searched for `*_key` host key files
    #[arg(long, env = "HOST_KEY_PATH")]
    host_key_path: Option<String>,

    /// Concurrent sessions allowed per identity
    #[arg(long, env = "MAX_CONNECTIONS")]
    max_connections: Option<String>,

    /// Banner advertised until mirroring succeeds (must start with SSH-2.0-)
    #[arg(long, env = "DEFAULT_SERVER_VERSION")]
    default_server_version: Option<String>,

    /// `host:port` of a server whose banner is mirrored ("disabled" to turn off)
    #[arg(long, env = "COPY_SERVER_VERSION")]
    copy_server_version: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.liberty/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn raw_settings(&self) -> RawSettings {
        RawSettings {
            redis_url: self.redis_url.clone(),
            listen_addr: self.listen_addr.clone(),
            socks_proxy: self.socks_proxy.clone(),
            host_key_path: self.host_key_path.clone(),
            max_connections: self.max_connections.clone(),
            default_server_version: self.default_server_version.clone(),
            copy_server_version: self.copy_server_version.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting liberty-server");

    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), cli.raw_settings()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    // Shared store
    let keys = StoreKeys::with_prefix(&server_config.store_prefix);
    let store = match RedisStore::connect(&server_config.redis_url, keys).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to connect to redis");
            std::process::exit(1);
        }
    };
    if let Err(e) = store.ping().await {
        error!(error = %e, "redis is not responding");
        std::process::exit(1);
    }
    if let Err(e) = store.reset_connections().await {
        warn!(error = %e, "failed to reset connection counters");
    }
    let store: Arc<dyn StateStore> = store;

    let host_keys = match hostkeys::load_host_keys(&server_config.host_key_path) {
        Ok(keys) => keys,
        Err(e) => {
            error!(error = %e, "failed to load host keys");
            std::process::exit(1);
        }
    };

    // Banner mirroring; give the first attempt a moment before accepting.
    let banner = SharedBanner::new(server_config.default_banner.clone());
    let mirror = BannerMirror::new(server_config.mirror.clone(), banner.clone());
    tokio::spawn(mirror.run());
    tokio::time::sleep(server_config.mirror.settle_delay).await;

    let ctx = Arc::new(GatewayContext {
        admission: AdmissionController::new(store.clone(), server_config.max_connections),
        forwarder: TunnelForwarder::new(
            DestinationPolicy::public_only(),
            server_config.socks_proxy.clone(),
            store,
        )
        .with_dial_timeout(server_config.dial_timeout),
    });
    info!(
        max_connections = ctx.admission.max_connections(),
        socks_proxy = server_config.socks_proxy.as_deref().unwrap_or("none"),
        "gateway ready"
    );

    let bridge = BridgeServer::new(server_config, host_keys, banner, ctx);

    tokio::select! {
        result = bridge.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("liberty-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
