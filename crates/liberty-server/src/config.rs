//! Server configuration: TOML file + CLI/environment settings.
//!
//! Required settings come from the command line or the environment
//! (`REDIS_URL`, `MAX_CONNECTIONS`, `DEFAULT_SERVER_VERSION`, …). Timing knobs
//! live in an optional TOML file. Everything is validated here so that a bad
//! setting fails startup instead of the first session.

use liberty_core::banner::strip_version_prefix;
use liberty_core::{BridgeError, BridgeResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub mirror: MirrorSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Seconds without traffic before a session is dropped.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Maximum session lifetime in seconds.
    #[serde(default = "default_max_session")]
    pub max_session: u64,
    /// Seconds allowed for resolving and dialing a tunnel destination.
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout: u64,
    /// Key prefix for the shared store.
    #[serde(default = "default_store_prefix")]
    pub store_prefix: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            max_session: default_max_session(),
            dial_timeout: default_dial_timeout(),
            store_prefix: default_store_prefix(),
        }
    }
}

/// `[mirror]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorSection {
    #[serde(default = "default_mirror_interval")]
    pub interval: u64,
    #[serde(default = "default_mirror_jitter")]
    pub jitter: u64,
    #[serde(default = "default_mirror_connect_timeout")]
    pub connect_timeout: u64,
    /// Milliseconds to wait after starting the mirror before accepting.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for MirrorSection {
    fn default() -> Self {
        Self {
            interval: default_mirror_interval(),
            jitter: default_mirror_jitter(),
            connect_timeout: default_mirror_connect_timeout(),
            settle_ms: default_settle_ms(),
        }
    }
}

fn default_idle_timeout() -> u64 {
    60
}
fn default_max_session() -> u64 {
    6 * 3600
}
fn default_dial_timeout() -> u64 {
    10
}
fn default_store_prefix() -> String {
    "ssh-server".to_string()
}
fn default_mirror_interval() -> u64 {
    3600
}
fn default_mirror_jitter() -> u64 {
    3600
}
fn default_mirror_connect_timeout() -> u64 {
    10
}
fn default_settle_ms() -> u64 {
    1000
}

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:2222";
pub const DEFAULT_HOST_KEY_PATH: &str = "/root/etc/ssh/";

/// Unvalidated settings as they arrive from the CLI or environment.
#[derive(Debug, Clone, Default)]
pub struct RawSettings {
    pub redis_url: Option<String>,
    pub listen_addr: Option<String>,
    pub socks_proxy: Option<String>,
    pub host_key_path: Option<String>,
    pub max_connections: Option<String>,
    pub default_server_version: Option<String>,
    pub copy_server_version: Option<String>,
}

/// Banner mirroring schedule.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Remote SSH server to copy the banner from; `None` disables mirroring.
    pub source: Option<String>,
    pub interval: Duration,
    pub jitter: Duration,
    pub connect_timeout: Duration,
    pub settle_delay: Duration,
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub redis_url: String,
    pub store_prefix: String,
    pub listen_addr: String,
    pub host_key_path: PathBuf,
    /// Concurrent sessions allowed per identity.
    pub max_connections: i64,
    /// Upstream SOCKS5 proxy (`host:port`) for every tunnel.
    pub socks_proxy: Option<String>,
    /// Default banner, without the `SSH-2.0-` prefix.
    pub default_banner: String,
    pub idle_timeout: Duration,
    pub max_session: Duration,
    pub dial_timeout: Duration,
    pub mirror: MirrorConfig,
}

impl ServerConfig {
    /// Load config from TOML file, then validate and apply CLI/env settings.
    pub fn load(config_path: Option<&Path>, raw: RawSettings) -> BridgeResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| BridgeError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::from_parts(file_config, raw)
    }

    fn from_parts(file: ConfigFile, raw: RawSettings) -> BridgeResult<Self> {
        let redis_url = non_empty(raw.redis_url).ok_or_else(|| {
            BridgeError::Config(
                "REDIS_URL not provided. Consider adding it to the environment".to_string(),
            )
        })?;

        let max_connections = non_empty(raw.max_connections)
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| BridgeError::Config("invalid MAX_CONNECTIONS parameter".to_string()))?;

        let default_version = non_empty(raw.default_server_version).ok_or_else(|| {
            BridgeError::Config("DEFAULT_SERVER_VERSION not provided".to_string())
        })?;
        let default_banner = strip_version_prefix(&default_version)
            .map_err(|e| BridgeError::Config(format!("DEFAULT_SERVER_VERSION {e}")))?
            .to_string();

        let listen_addr = match non_empty(raw.listen_addr) {
            Some(addr) if addr.starts_with(':') => format!("0.0.0.0{addr}"),
            Some(addr) => addr,
            None => DEFAULT_LISTEN_ADDR.to_string(),
        };

        let host_key_path = non_empty(raw.host_key_path)
            .map(|p| expand_tilde_str(&p))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOST_KEY_PATH));

        let mirror_source = non_empty(raw.copy_server_version)
            .filter(|s| !s.eq_ignore_ascii_case("disabled"));

        Ok(Self {
            redis_url,
            store_prefix: file.server.store_prefix,
            listen_addr,
            host_key_path,
            max_connections,
            socks_proxy: non_empty(raw.socks_proxy),
            default_banner,
            idle_timeout: Duration::from_secs(file.server.idle_timeout),
            max_session: Duration::from_secs(file.server.max_session),
            dial_timeout: Duration::from_secs(file.server.dial_timeout),
            mirror: MirrorConfig {
                source: mirror_source,
                interval: Duration::from_secs(file.mirror.interval),
                jitter: Duration::from_secs(file.mirror.jitter),
                connect_timeout: Duration::from_secs(file.mirror.connect_timeout),
                settle_delay: Duration::from_millis(file.mirror.settle_ms),
            },
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> RawSettings {
        RawSettings {
            redis_url: Some("redis://127.0.0.1:6379/0".to_string()),
            max_connections: Some("2".to_string()),
            default_server_version: Some("SSH-2.0-OpenSSH_8.9p1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = ServerConfig::load(None, valid()).unwrap();
        assert_eq!(cfg.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(cfg.host_key_path, PathBuf::from(DEFAULT_HOST_KEY_PATH));
        assert_eq!(cfg.max_connections, 2);
        assert_eq!(cfg.default_banner, "OpenSSH_8.9p1");
        assert_eq!(cfg.idle_timeout, Duration::from_secs(60));
        assert_eq!(cfg.max_session, Duration::from_secs(21600));
        assert_eq!(cfg.dial_timeout, Duration::from_secs(10));
        assert!(cfg.socks_proxy.is_none());
        assert!(cfg.mirror.source.is_none());
        assert_eq!(cfg.mirror.interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_missing_redis_url() {
        let raw = RawSettings {
            redis_url: None,
            ..valid()
        };
        assert!(matches!(
            ServerConfig::load(None, raw),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_max_connections() {
        for bad in [None, Some(""), Some("0"), Some("-3"), Some("many")] {
            let raw = RawSettings {
                max_connections: bad.map(str::to_string),
                ..valid()
            };
            assert!(ServerConfig::load(None, raw).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_banner_requires_prefix() {
        let raw = RawSettings {
            default_server_version: Some("OpenSSH_8.9".to_string()),
            ..valid()
        };
        assert!(ServerConfig::load(None, raw).is_err());

        let raw = RawSettings {
            default_server_version: None,
            ..valid()
        };
        assert!(ServerConfig::load(None, raw).is_err());
    }

    #[test]
    fn test_listen_shorthand_and_mirror_flag() {
        let raw = RawSettings {
            listen_addr: Some(":2022".to_string()),
            copy_server_version: Some("DISABLED".to_string()),
            socks_proxy: Some("127.0.0.1:1080".to_string()),
            ..valid()
        };
        let cfg = ServerConfig::load(None, raw).unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:2022");
        assert!(cfg.mirror.source.is_none());
        assert_eq!(cfg.socks_proxy.as_deref(), Some("127.0.0.1:1080"));

        let raw = RawSettings {
            copy_server_version: Some("github.com:22".to_string()),
            ..valid()
        };
        let cfg = ServerConfig::load(None, raw).unwrap();
        assert_eq!(cfg.mirror.source.as_deref(), Some("github.com:22"));
    }

    #[test]
    fn test_file_overrides_timing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nidle_timeout = 30\nmax_session = 600\ndial_timeout = 3\n\n[mirror]\ninterval = 120\njitter = 0"
        )
        .unwrap();
        let cfg = ServerConfig::load(Some(file.path()), valid()).unwrap();
        assert_eq!(cfg.idle_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_session, Duration::from_secs(600));
        assert_eq!(cfg.dial_timeout, Duration::from_secs(3));
        assert_eq!(cfg.mirror.interval, Duration::from_secs(120));
        assert_eq!(cfg.mirror.jitter, Duration::ZERO);
        assert_eq!(cfg.mirror.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nidle_timeout = \"soon\"").unwrap();
        assert!(ServerConfig::load(Some(file.path()), valid()).is_err());
    }
}
