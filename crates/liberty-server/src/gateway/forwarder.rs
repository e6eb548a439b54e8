//! Tunnel setup: turns a `direct-tcpip` request into an outbound
//! connection, or a classified rejection.
//!
//! Order of operations: parse, resolve, policy check, dial. The channel is
//! only accepted once the outbound side exists, so every failure can still be
//! reported to the client as a channel-open failure.

use super::policy::DestinationPolicy;
use super::relay::{self, RelayHandles, TunnelIo};
use super::resolver::DnsResolver;
use liberty_core::{RejectKind, StateStore, TunnelRejection, TunnelRequest};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_socks::tcp::Socks5Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resolve + dial budget unless configured otherwise.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound half of a tunnel: a direct TCP stream or one through the proxy.
pub type Outbound = Box<dyn TunnelIo>;

/// A dialed tunnel, ready to be relayed.
pub struct OpenedTunnel {
    pub request: TunnelRequest,
    /// The concrete address that was dialed.
    pub resolved: SocketAddr,
    pub outbound: Outbound,
}

/// Opens tunnels for forwarding requests and starts their relays.
///
/// Shared by every session; holds no per-tunnel state.
pub struct TunnelForwarder {
    /// Destination allow/deny check.
    policy: DestinationPolicy,
    /// Upstream SOCKS5 proxy (`host:port`), if configured.
    socks_proxy: Option<String>,
    /// Store receiving per-identity usage.
    store: Arc<dyn StateStore>,
    dial_timeout: Duration,
}

impl TunnelForwarder {
    pub fn new(
        policy: DestinationPolicy,
        socks_proxy: Option<String>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            policy,
            socks_proxy,
            store,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }

    /// Bound the time spent resolving and dialing a single tunnel.
    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    /// Resolve, check and dial the destination of `request`.
    ///
    /// Resolution and dialing share one deadline of `dial_timeout`. The dial
    /// is also abandoned if `session_end` fires first.
    ///
    /// # Errors
    ///
    /// - [`RejectKind::Unresolvable`] if the host does not resolve.
    /// - [`RejectKind::Prohibited`] if the resolved address is denied by policy.
    /// - [`RejectKind::ConnectionFailed`] if the destination or proxy cannot be
    ///   reached, the deadline passed, or the session ended during the dial.
    pub async fn open(
        &self,
        request: TunnelRequest,
        session_end: &CancellationToken,
    ) -> Result<OpenedTunnel, TunnelRejection> {
        let deadline = Instant::now() + self.dial_timeout;
        let timed_out = || {
            TunnelRejection::new(
                RejectKind::ConnectionFailed,
                format!("timed out after {}s", self.dial_timeout.as_secs_f32()),
            )
        };

        let ip = tokio::time::timeout_at(deadline, DnsResolver::resolve(&request.host))
            .await
            .map_err(|_| timed_out())?
            .map_err(|reason| TunnelRejection::new(RejectKind::Unresolvable, reason))?;

        if let Err(reason) = self.policy.check(ip) {
            debug!(host = %request.host, ip = %ip, "destination denied by policy");
            return Err(TunnelRejection::new(RejectKind::Prohibited, reason));
        }

        let target = SocketAddr::new(ip, request.port);
        let outbound = tokio::select! {
            biased;
            _ = session_end.cancelled() => {
                return Err(TunnelRejection::new(RejectKind::ConnectionFailed, "session closed"));
            }
            result = tokio::time::timeout_at(deadline, self.dial(target)) => match result {
                Ok(Ok(outbound)) => outbound,
                Ok(Err(reason)) => {
                    warn!(target = %target, error = %reason, "tunnel dial failed");
                    return Err(TunnelRejection::new(RejectKind::ConnectionFailed, reason));
                }
                Err(_) => {
                    warn!(target = %target, "tunnel dial timed out");
                    return Err(timed_out());
                }
            },
        };

        info!(
            host = %request.host,
            target = %target,
            origin = %format!("{}:{}", request.origin_host, request.origin_port),
            via_proxy = self.socks_proxy.is_some(),
            "tunnel established"
        );

        Ok(OpenedTunnel {
            request,
            resolved: target,
            outbound,
        })
    }

    /// Start relaying between the accepted `channel` and the tunnel's
    /// outbound connection, metering usage for `identity`.
    pub fn relay<C>(&self, identity: &str, channel: C, tunnel: OpenedTunnel) -> RelayHandles
    where
        C: TunnelIo + 'static,
    {
        relay::spawn(
            identity.to_string(),
            channel,
            tunnel.outbound,
            self.store.clone(),
        )
    }

    async fn dial(&self, target: SocketAddr) -> Result<Outbound, String> {
        match &self.socks_proxy {
            Some(proxy) => {
                let stream = Socks5Stream::connect(proxy.as_str(), target)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(Box::new(stream))
            }
            None => {
                let stream = TcpStream::connect(target)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(Box::new(stream))
            }
        }
    }
}
