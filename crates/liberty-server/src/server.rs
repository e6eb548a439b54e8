//! Core server: accepts TCP connections and runs one SSH session per
//! connection.
//!
//! Owns the host keys, the shared banner and the gateway context. The russh
//! configuration is rebuilt for every connection so each client sees the
//! banner current at the time it connected.

use crate::config::ServerConfig;
use crate::handler::{GatewayContext, SessionHandler};
use crate::mirror::SharedBanner;
use liberty_core::{identification_line, BridgeResult};
use russh::keys::PrivateKey;
use russh::server::Config;
use russh::{Disconnect, MethodKind, MethodSet, SshId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// The gateway server instance.
pub struct BridgeServer {
    config: ServerConfig,
    keys: Vec<PrivateKey>,
    banner: SharedBanner,
    ctx: Arc<GatewayContext>,
}

impl BridgeServer {
    pub fn new(
        config: ServerConfig,
        keys: Vec<PrivateKey>,
        banner: SharedBanner,
        ctx: Arc<GatewayContext>,
    ) -> Self {
        Self {
            config,
            keys,
            banner,
            ctx,
        }
    }

    /// Bind the listen address and serve until the process exits.
    pub async fn run(self) -> BridgeResult<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        info!(addr = %listener.local_addr()?, "listening for ssh connections");
        self.serve(listener).await
    }

    /// Accept loop on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> BridgeResult<()> {
        let server = Arc::new(self);
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            let server = server.clone();
            tokio::spawn(async move {
                server.serve_connection(stream, peer).await;
            });
        }
    }

    /// Build the SSH configuration for a new connection.
    async fn session_config(&self) -> Config {
        let banner = self.banner.get().await;
        Config {
            server_id: SshId::Standard(identification_line(&banner)),
            methods: MethodSet::from([MethodKind::PublicKey].as_slice()),
            keys: self.keys.clone(),
            inactivity_timeout: Some(self.config.idle_timeout),
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            nodelay: true,
            ..Default::default()
        }
    }

    async fn serve_connection(&self, stream: TcpStream, peer: SocketAddr) {
        debug!(peer = %peer, "new connection");
        let config = Arc::new(self.session_config().await);
        let handler = SessionHandler::new(self.ctx.clone(), Some(peer));

        let session = match russh::server::run_stream(config, stream, handler).await {
            Ok(session) => session,
            Err(e) => {
                debug!(peer = %peer, error = %e, "ssh handshake failed");
                return;
            }
        };
        let handle = session.handle();
        tokio::pin!(session);

        match tokio::time::timeout(self.config.max_session, &mut session).await {
            Ok(Ok(())) => debug!(peer = %peer, "connection closed"),
            Ok(Err(e)) => debug!(peer = %peer, error = %e, "connection ended with error"),
            Err(_) => {
                info!(
                    peer = %peer,
                    max_secs = self.config.max_session.as_secs(),
                    "maximum session duration reached, disconnecting"
                );
                let _ = handle
                    .disconnect(
                        Disconnect::ByApplication,
                        "maximum session duration reached".to_string(),
                        String::new(),
                    )
                    .await;
                let _ = tokio::time::timeout(Duration::from_secs(5), session).await;
            }
        }
    }
}
