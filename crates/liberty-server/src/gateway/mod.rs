//! Gateway module: `direct-tcpip` tunnels to outside destinations.
//!
//! # Submodule Architecture
//!
//! - **[`policy`]**: [`DestinationPolicy`], an injected predicate over
//!   resolved addresses. Production uses the public-only rule.
//!
//! - **[`resolver`]**: [`DnsResolver`](resolver::DnsResolver) turns the requested host into one
//!   concrete address (IPv4 first, then IPv6).
//!
//! - **[`forwarder`]**: [`TunnelForwarder`] resolves, checks policy and dials
//!   (directly or through the upstream SOCKS5 proxy), producing either an
//!   [`OpenedTunnel`](forwarder::OpenedTunnel) or a classified rejection.
//!
//! - **[`relay`]**: two copy tasks per tunnel with per-direction usage
//!   accounting.
//!
//! # Data Flow
//!
//! ```text
//! russh channel_open_direct_tcpip (handler.rs)
//!   → TunnelRequest::parse
//!   → TunnelForwarder::open
//!       → DnsResolver::resolve
//!       → DestinationPolicy::check
//!       → dial (TcpStream / Socks5Stream), raced against session end
//!   → accept channel
//!   → TunnelForwarder::relay → two relay tasks → StateStore::add_usage
//! ```

pub mod forwarder;
pub mod policy;
pub mod relay;
pub mod resolver;

pub use forwarder::TunnelForwarder;
pub use policy::DestinationPolicy;
