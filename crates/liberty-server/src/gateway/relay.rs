//! Bidirectional tunnel relay with usage metering.
//!
//! A tunnel is serviced by two tasks, one per direction. Each task counts
//! the bytes it delivered. When either direction ends (EOF, I/O error) both
//! ends of the pair are closed, and each task adds its own count to the
//! identity's usage, so a tunnel that only flowed one way still reports the
//! bytes of that side.

use liberty_core::StateStore;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const RELAY_BUF_SIZE: usize = 16 * 1024;

/// Anything a tunnel can relay over: SSH channel streams, TCP streams,
/// SOCKS streams.
pub trait TunnelIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TunnelIo for T {}

/// Join handles of a tunnel's two relay tasks. Each resolves to the number
/// of bytes that direction delivered, after it has been added to usage.
pub struct RelayHandles {
    /// Channel to outbound.
    pub upstream: JoinHandle<u64>,
    /// Outbound to channel.
    pub downstream: JoinHandle<u64>,
}

impl RelayHandles {
    /// Wait for both directions, returning `(upstream, downstream)` byte counts.
    pub async fn join(self) -> (u64, u64) {
        let up = self.upstream.await.unwrap_or(0);
        let down = self.downstream.await.unwrap_or(0);
        (up, down)
    }
}

/// Spawn both relay tasks for one tunnel.
pub fn spawn<C, O>(identity: String, channel: C, outbound: O, store: Arc<dyn StateStore>) -> RelayHandles
where
    C: TunnelIo + 'static,
    O: TunnelIo + 'static,
{
    let (channel_rx, channel_tx) = tokio::io::split(channel);
    let (outbound_rx, outbound_tx) = tokio::io::split(outbound);
    let closed = CancellationToken::new();

    let upstream = tokio::spawn(direction(
        "upstream",
        channel_rx,
        outbound_tx,
        closed.clone(),
        identity.clone(),
        store.clone(),
    ));
    let downstream = tokio::spawn(direction(
        "downstream",
        outbound_rx,
        channel_tx,
        closed,
        identity,
        store,
    ));

    RelayHandles {
        upstream,
        downstream,
    }
}

async fn direction<R, W>(
    label: &'static str,
    reader: R,
    writer: W,
    closed: CancellationToken,
    identity: String,
    store: Arc<dyn StateStore>,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = pump(reader, writer, &closed).await;
    debug!(identity = %identity, direction = label, bytes = copied, "relay direction ended");

    if copied > 0 {
        if let Err(e) = store.add_usage(&identity, copied).await {
            warn!(identity = %identity, bytes = copied, error = %e, "failed to record usage");
        }
    }
    copied
}

/// Copy until EOF, an I/O error, or `closed` fires. Then shut the writer
/// down and fire `closed` so the sibling direction stops too.
async fn pump<R, W>(mut reader: R, mut writer: W, closed: &CancellationToken) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = tokio::select! {
            _ = closed.cancelled() => break,
            result = reader.read(&mut buf) => match result {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };
        let written = tokio::select! {
            _ = closed.cancelled() => break,
            result = writer.write_all(&buf[..n]) => result,
        };
        if written.is_err() {
            break;
        }
        total += n as u64;
    }

    let _ = writer.shutdown().await;
    closed.cancel();
    total
}
