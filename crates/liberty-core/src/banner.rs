//! SSH version banner parsing.
//!
//! Banners are kept without the `SSH-2.0-` prefix (e.g. `OpenSSH_8.9`) and
//! the prefix is added back when the identification line is sent.

use crate::error::{BridgeError, BridgeResult};

/// Prefix every SSH 2.0 identification line starts with.
pub const SSH_VERSION_PREFIX: &str = "SSH-2.0-";

/// Size of the buffer a mirrored banner is read into. A response that fills
/// it completely is treated as garbage.
pub const BANNER_BUF_SIZE: usize = 256;

/// Strip the `SSH-2.0-` prefix from a configured or received version string.
pub fn strip_version_prefix(version: &str) -> BridgeResult<&str> {
    let rest = version.strip_prefix(SSH_VERSION_PREFIX).ok_or_else(|| {
        BridgeError::Banner(format!("does not start with `{SSH_VERSION_PREFIX}`"))
    })?;
    if rest.is_empty() {
        return Err(BridgeError::Banner("empty software version".to_string()));
    }
    Ok(rest)
}

/// Extract the software version from the bytes a remote SSH server sent.
///
/// Everything from the first NUL byte on is padding, and only the first line
/// is the identification string (a server may send its KEXINIT right after).
pub fn parse_remote_banner(buf: &[u8]) -> BridgeResult<String> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let text = String::from_utf8_lossy(&buf[..end]);
    let line = text
        .trim_start()
        .split('\n')
        .next()
        .unwrap_or_default()
        .trim();
    strip_version_prefix(line).map(str::to_string)
}

/// Full identification line for a stored banner.
pub fn identification_line(banner: &str) -> String {
    format!("{SSH_VERSION_PREFIX}{banner}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_zero_padded() {
        let mut buf = b"SSH-2.0-OpenSSH_8.9".to_vec();
        buf.resize(64, 0);
        assert_eq!(parse_remote_banner(&buf).unwrap(), "OpenSSH_8.9");
    }

    #[test]
    fn test_parse_crlf_and_trailing_packet() {
        let buf = b"SSH-2.0-OpenSSH_9.6p1 Ubuntu-3ubuntu13\r\n\x00\x00\x05\xdc\x07\x14";
        assert_eq!(
            parse_remote_banner(buf).unwrap(),
            "OpenSSH_9.6p1 Ubuntu-3ubuntu13"
        );
    }

    #[test]
    fn test_parse_missing_prefix() {
        assert!(parse_remote_banner(b"HTTP/1.1 400 Bad Request\r\n").is_err());
        assert!(parse_remote_banner(b"SSH-1.99-OpenSSH_3.9\r\n").is_err());
        assert!(parse_remote_banner(b"").is_err());
    }

    #[test]
    fn test_parse_empty_version() {
        assert!(parse_remote_banner(b"SSH-2.0-\r\n").is_err());
    }

    #[test]
    fn test_strip_and_restore() {
        let stored = strip_version_prefix("SSH-2.0-dropbear_2022.83").unwrap();
        assert_eq!(stored, "dropbear_2022.83");
        assert_eq!(identification_line(stored), "SSH-2.0-dropbear_2022.83");
    }
}
