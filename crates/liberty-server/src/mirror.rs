//! Banner mirroring: periodically copies another SSH server's version
//! banner so this gateway does not stand out by its identification string.
//!
//! The loop is an explicit state machine:
//!
//! ```text
//! Connecting ──ok──▶ Reading ──ok──▶ Validating ──▶ Sleeping ──▶ Connecting
//!      │                │                                ▲
//!      └──── error ─────┴────────────────────────────────┘
//! ```
//!
//! Every failure is logged and ends the iteration in `Sleeping`; the loop
//! itself never exits unless mirroring is disabled.

use crate::config::MirrorConfig;
use liberty_core::banner::{parse_remote_banner, BANNER_BUF_SIZE};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lower bound on the delay between two mirror attempts.
const MIN_MIRROR_DELAY: Duration = Duration::from_secs(1);

/// The advertised software version (without `SSH-2.0-`), shared between the
/// mirror loop (writer) and the accept loop (reader).
#[derive(Debug, Clone)]
pub struct SharedBanner {
    inner: Arc<Mutex<String>>,
}

impl SharedBanner {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial.into())),
        }
    }

    pub async fn get(&self) -> String {
        self.inner.lock().await.clone()
    }

    pub async fn set(&self, banner: String) {
        *self.inner.lock().await = banner;
    }
}

/// Result of one mirror iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// The shared banner now holds this value.
    Updated(String),
    /// Nothing changed; the reason was logged.
    Failed(String),
}

enum MirrorState {
    Connecting,
    Reading(TcpStream),
    Validating(Vec<u8>),
    Sleeping(MirrorOutcome),
}

/// Background task copying a remote banner into a [`SharedBanner`].
pub struct BannerMirror {
    config: MirrorConfig,
    banner: SharedBanner,
}

impl BannerMirror {
    pub fn new(config: MirrorConfig, banner: SharedBanner) -> Self {
        Self { config, banner }
    }

    /// Run until the process exits. Returns immediately when no mirror
    /// source is configured.
    pub async fn run(self) {
        let Some(source) = self.config.source.clone() else {
            info!("not copying the version string from another server");
            return;
        };
        info!(source = %source, "mirroring version string");

        let mut state = MirrorState::Connecting;
        loop {
            state = match state {
                MirrorState::Sleeping(_) => {
                    let delay = self.next_delay();
                    debug!(delay_secs = delay.as_secs(), "next banner refresh scheduled");
                    tokio::time::sleep(delay).await;
                    MirrorState::Connecting
                }
                other => self.step(&source, other).await,
            };
        }
    }

    /// Run a single iteration against `source`, up to the point where the
    /// loop would go to sleep.
    pub async fn run_once(&self, source: &str) -> MirrorOutcome {
        let mut state = MirrorState::Connecting;
        loop {
            state = match self.step(source, state).await {
                MirrorState::Sleeping(outcome) => return outcome,
                next => next,
            };
        }
    }

    async fn step(&self, source: &str, state: MirrorState) -> MirrorState {
        match state {
            MirrorState::Connecting => {
                match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(source))
                    .await
                {
                    Ok(Ok(stream)) => MirrorState::Reading(stream),
                    Ok(Err(e)) => self.fail(format!(
                        "could not copy the version string from another server: {e}"
                    )),
                    Err(_) => self.fail(format!("timed out connecting to {source}")),
                }
            }
            MirrorState::Reading(mut stream) => {
                match tokio::time::timeout(self.config.connect_timeout, read_banner(&mut stream))
                    .await
                {
                    Ok(Ok(bytes)) => MirrorState::Validating(bytes),
                    Ok(Err(reason)) => self.fail(reason),
                    Err(_) => self.fail(format!("timed out reading banner from {source}")),
                }
            }
            MirrorState::Validating(bytes) => match parse_remote_banner(&bytes) {
                Ok(version) => {
                    self.banner.set(version.clone()).await;
                    info!(banner = %version, "version string updated");
                    MirrorState::Sleeping(MirrorOutcome::Updated(version))
                }
                Err(e) => self.fail(format!("response from mirrored server is invalid: {e}")),
            },
            sleeping @ MirrorState::Sleeping(_) => sleeping,
        }
    }

    fn fail(&self, reason: String) -> MirrorState {
        warn!(reason = %reason, "banner mirror iteration failed");
        MirrorState::Sleeping(MirrorOutcome::Failed(reason))
    }

    /// `interval ± jitter`, drawn uniformly, never below [`MIN_MIRROR_DELAY`].
    pub fn next_delay(&self) -> Duration {
        let base = self.config.interval.as_millis() as i64;
        let jitter = self.config.jitter.as_millis() as i64;
        let offset = rand::thread_rng().gen_range(-jitter..=jitter);
        let millis = (base + offset).max(MIN_MIRROR_DELAY.as_millis() as i64);
        Duration::from_millis(millis as u64)
    }
}

/// Read the identification line: stop at a newline, EOF or a full buffer.
/// A full buffer means the peer is not sending a sane banner.
async fn read_banner(stream: &mut TcpStream) -> Result<Vec<u8>, String> {
    let mut buf = vec![0u8; BANNER_BUF_SIZE];
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream
            .read(&mut buf[filled..])
            .await
            .map_err(|e| format!("invalid response from mirrored server, len={filled}: {e}"))?;
        if n == 0 {
            break;
        }
        filled += n;
        if buf[..filled].contains(&b'\n') {
            break;
        }
    }
    if filled == buf.len() {
        return Err(format!("invalid response from mirrored server, len={filled}"));
    }
    buf.truncate(filled);
    Ok(buf)
}
