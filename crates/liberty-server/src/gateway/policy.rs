//! Gateway policy: decides which resolved destinations tunnels may reach.
//!
//! [`DestinationPolicy`] wraps a pure predicate over IP addresses. The
//! production predicate is [`is_public_destination`]; tests inject a
//! permissive one so relays can be exercised against loopback listeners.

use liberty_core::is_public_destination;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

type Predicate = dyn Fn(IpAddr) -> bool + Send + Sync;

/// Destination allow/deny check, consulted after resolution and before dial.
#[derive(Clone)]
pub struct DestinationPolicy {
    allow: Arc<Predicate>,
}

impl DestinationPolicy {
    /// Build a policy from an arbitrary predicate.
    pub fn new(allow: impl Fn(IpAddr) -> bool + Send + Sync + 'static) -> Self {
        Self {
            allow: Arc::new(allow),
        }
    }

    /// Only public, routable addresses.
    pub fn public_only() -> Self {
        Self::new(is_public_destination)
    }

    /// Check whether a tunnel to `ip` is allowed.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` with a short reason when the address is denied.
    pub fn check(&self, ip: IpAddr) -> Result<(), String> {
        if (self.allow)(ip) {
            Ok(())
        } else {
            Err("illegal address".to_string())
        }
    }
}

impl Default for DestinationPolicy {
    fn default() -> Self {
        Self::public_only()
    }
}

impl fmt::Debug for DestinationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationPolicy").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_only() {
        let policy = DestinationPolicy::default();
        assert!(policy.check("127.0.0.1".parse().unwrap()).is_err());
        assert!(policy.check("192.168.0.10".parse().unwrap()).is_err());
        assert!(policy.check("fe80::1".parse().unwrap()).is_err());
        assert!(policy.check("1.1.1.1".parse().unwrap()).is_ok());
    }

    #[test]
    fn test_injected_predicate() {
        let policy = DestinationPolicy::new(|ip| ip.is_loopback());
        assert!(policy.check("127.0.0.1".parse().unwrap()).is_ok());
        assert!(policy.check("1.1.1.1".parse().unwrap()).is_err());
    }
}
