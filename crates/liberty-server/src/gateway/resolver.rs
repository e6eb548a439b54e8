//! DNS resolution via `tokio::net::lookup_host`.
//!
//! Tunnels dial a single concrete address: IP literals are used as-is,
//! hostnames resolve to their first IPv4 address, falling back to the first
//! IPv6 address.

use std::net::IpAddr;
use tokio::net;
use tracing::{debug, warn};

/// Stateless async DNS resolver.
pub struct DnsResolver;

impl DnsResolver {
    /// Resolve `host` to one address, preferring IPv4.
    ///
    /// Bracketed IPv6 literals (`[::1]`) are accepted.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` if the lookup fails or yields no addresses.
    pub async fn resolve(host: &str) -> Result<IpAddr, String> {
        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = literal.parse::<IpAddr>() {
            return Ok(ip);
        }

        match net::lookup_host((host, 0)).await {
            Ok(addrs) => {
                let ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
                let chosen = ips
                    .iter()
                    .find(|ip| ip.is_ipv4())
                    .or_else(|| ips.iter().find(|ip| ip.is_ipv6()))
                    .copied();
                match chosen {
                    Some(ip) => {
                        debug!(host = %host, ip = %ip, "resolved");
                        Ok(ip)
                    }
                    None => Err(format!("cannot resolve address: {host}")),
                }
            }
            Err(e) => {
                warn!(host = %host, error = %e, "DNS resolution failed");
                Err(format!("cannot resolve address: {host}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_literals() {
        assert_eq!(
            DnsResolver::resolve("93.184.216.34").await.unwrap(),
            "93.184.216.34".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            DnsResolver::resolve("[2001:db8::1]").await.unwrap(),
            "2001:db8::1".parse::<IpAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let ip = DnsResolver::resolve("localhost").await.unwrap();
        assert!(ip.is_loopback(), "localhost resolved to {ip}");
    }

    #[tokio::test]
    async fn test_resolve_invalid() {
        let result = DnsResolver::resolve("this.host.definitely.does.not.exist.invalid").await;
        assert!(result.is_err());
    }
}
