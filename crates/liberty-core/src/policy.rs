//! Destination address policy.
//!
//! Tunnels may only reach public addresses. Loopback, link-local (unicast and
//! multicast), private-range and unspecified addresses are refused so the
//! gateway cannot be used to reach its own network.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Returns `true` if a tunnel may be opened to `ip`.
///
/// IPv4-mapped IPv6 addresses are judged as the IPv4 address they carry.
pub fn is_public_destination(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => is_public_v6(v6),
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    let link_local_multicast = o[0] == 224 && o[1] == 0 && o[2] == 0;
    !(ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || link_local_multicast)
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    let s = ip.segments();
    // fe80::/10
    let link_local_unicast = (s[0] & 0xffc0) == 0xfe80;
    // ffX2::/16
    let link_local_multicast = (s[0] & 0xff0f) == 0xff02;
    // fc00::/7
    let unique_local = (s[0] & 0xfe00) == 0xfc00;
    !(ip.is_loopback()
        || ip.is_unspecified()
        || link_local_unicast
        || link_local_multicast
        || unique_local)
}
