//! Per-connection SSH handler: the hooks russh calls into.
//!
//! Only public-key authentication and `direct-tcpip` channels are served.
//! The handler owns the session end token; russh drops the handler when the
//! connection goes away (client close, idle timeout, forced disconnect), and
//! dropping fires the token.

use crate::auth::AdmissionController;
use crate::gateway::TunnelForwarder;
use liberty_core::TunnelRequest;
use russh::keys::HashAlg;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, MethodKind, MethodSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Components shared by every session.
pub struct GatewayContext {
    pub admission: AdmissionController,
    pub forwarder: TunnelForwarder,
}

/// Per-connection SSH handler.
pub struct SessionHandler {
    ctx: Arc<GatewayContext>,
    peer_addr: Option<SocketAddr>,
    /// Set once admission succeeded.
    identity: Option<String>,
    /// Fired when this session ends.
    session_end: CancellationToken,
}

impl SessionHandler {
    pub fn new(ctx: Arc<GatewayContext>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            ctx,
            peer_addr,
            identity: None,
            session_end: CancellationToken::new(),
        }
    }

    fn reject() -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(MethodSet::from([MethodKind::PublicKey].as_slice())),
        }
    }

    fn peer(&self) -> String {
        self.peer_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl Drop for SessionHandler {
    fn drop(&mut self) {
        self.session_end.cancel();
        if let Some(identity) = &self.identity {
            debug!(identity = %identity, peer = %self.peer(), "session ended");
        }
    }
}

impl russh::server::Handler for SessionHandler {
    type Error = anyhow::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.identity.is_some() {
            return Ok(Self::reject());
        }

        let credential = public_key.to_openssh()?;
        let fingerprint = public_key.fingerprint(HashAlg::Sha256);
        let signal = Some(&self.session_end).filter(|t| !t.is_cancelled());
        match self.ctx.admission.authorize(user, &credential, signal).await {
            Ok(()) => {
                info!(
                    identity = %user,
                    peer = %self.peer(),
                    fingerprint = %fingerprint,
                    "public key auth success"
                );
                self.identity = Some(user.to_string());
                Ok(Auth::Accept)
            }
            Err(rejection) => {
                info!(
                    identity = %user,
                    peer = %self.peer(),
                    fingerprint = %fingerprint,
                    reason = %rejection,
                    "public key auth rejected"
                );
                Ok(Self::reject())
            }
        }
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        debug!(user = %user, peer = %self.peer(), "password auth refused");
        Ok(Self::reject())
    }

    async fn auth_keyboard_interactive(
        &mut self,
        user: &str,
        _submethods: &str,
        _response: Option<russh::server::Response<'_>>,
    ) -> Result<Auth, Self::Error> {
        debug!(user = %user, peer = %self.peer(), "keyboard-interactive auth refused");
        Ok(Self::reject())
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Some(identity) = self.identity.clone() else {
            return Ok(false);
        };

        let request = match TunnelRequest::parse(
            host_to_connect,
            port_to_connect,
            originator_address,
            originator_port,
        ) {
            Ok(request) => request,
            Err(rejection) => {
                warn!(
                    identity = %identity,
                    kind = %rejection.kind,
                    code = rejection.kind.reason_code(),
                    reason = %rejection.reason,
                    "tunnel rejected"
                );
                // russh refuses every channel as administratively prohibited;
                // the kind and reason code only reach the log.
                return Ok(false);
            }
        };

        match self.ctx.forwarder.open(request, &self.session_end).await {
            Ok(tunnel) => {
                let host = tunnel.request.host.clone();
                let destination = tunnel.resolved;
                let relays = self
                    .ctx
                    .forwarder
                    .relay(&identity, channel.into_stream(), tunnel);
                tokio::spawn(async move {
                    let (up, down) = relays.join().await;
                    debug!(
                        identity = %identity,
                        host = %host,
                        destination = %destination,
                        bytes_up = up,
                        bytes_down = down,
                        "tunnel closed"
                    );
                });
                Ok(true)
            }
            Err(rejection) => {
                info!(
                    identity = %identity,
                    host = %host_to_connect,
                    port = port_to_connect,
                    kind = %rejection.kind,
                    code = rejection.kind.reason_code(),
                    reason = %rejection.reason,
                    "tunnel rejected"
                );
                // Same as above: the client only sees a generic refusal.
                Ok(false)
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(identity = ?self.identity, peer = %self.peer(), "session channel refused");
        Ok(false)
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(host = %host_to_connect, port = port_to_connect, "forwarded-tcpip channel refused");
        Ok(false)
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(address = %address, port = *port, "reverse forwarding refused");
        Ok(false)
    }
}
