//! The three advertiser tasks.
//!
//! The listener and the pacer both post to one trigger channel; the sender
//! drains it and multicasts the advertisement once per trigger. Every task
//! also watches the shared shutdown channel.

use std::net::{SocketAddr, SocketAddrV6};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use popura_core::ndp::{NdpMessage, ALL_NODES};

use super::iface::{recv_with_hop_limit, ND_HOP_LIMIT};
use super::pacing::multicast_delay;

/// Pause after a failed receive before trying again.
pub const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Counters shared by the tasks and read by the admin hook.
#[derive(Debug, Default)]
pub struct RAdvStats {
    pub solicitations: AtomicU64,
    pub advertisements: AtomicU64,
    pub send_errors: AtomicU64,
    pub recv_errors: AtomicU64,
}

impl RAdvStats {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.solicitations.load(Ordering::Relaxed),
            self.advertisements.load(Ordering::Relaxed),
            self.send_errors.load(Ordering::Relaxed),
        )
    }
}

/// The all-nodes group on the interface with `interface_index`.
pub fn all_nodes(interface_index: u32) -> SocketAddr {
    SocketAddr::V6(SocketAddrV6::new(ALL_NODES, 0, 0, interface_index))
}

/// RFC 4861 §6.1.1: a solicitation that crossed a router is not from this
/// link. Sockets that do not report the hop limit give `None`.
fn on_link(hop_limit: Option<u32>) -> bool {
    hop_limit.map_or(true, |h| h == ND_HOP_LIMIT)
}

/// Wait for Router Solicitations and turn each into a trigger.
pub async fn listener_loop(
    socket: Arc<UdpSocket>,
    trigger: mpsc::Sender<()>,
    stats: Arc<RAdvStats>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; 1500];

    loop {
        let result = tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("radv listener shutting down");
                return;
            }
            result = recv_with_hop_limit(&socket, &mut buf) => result,
        };

        let received = match result {
            Ok(r) => r,
            Err(e) => {
                stats.recv_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "radv: receive failed");
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
                }
                continue;
            }
        };

        match NdpMessage::parse(&buf[..received.len]) {
            Ok(NdpMessage::RouterSolicitation { .. }) => {
                if !on_link(received.hop_limit) {
                    tracing::debug!(
                        from = ?received.from,
                        hop_limit = ?received.hop_limit,
                        "radv: dropping off-link router solicitation"
                    );
                    continue;
                }
                stats.solicitations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(from = ?received.from, "radv: router solicitation");
                // A full channel already has an advertisement queued.
                if let Err(mpsc::error::TrySendError::Closed(_)) = trigger.try_send(()) {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => tracing::trace!(from = ?received.from, error = %e, "radv: malformed ICMPv6"),
        }
    }
}

/// Send `packet` to `dest` once per trigger.
pub async fn sender_loop(
    socket: Arc<UdpSocket>,
    packet: Arc<Vec<u8>>,
    dest: SocketAddr,
    mut trigger: mpsc::Receiver<()>,
    stats: Arc<RAdvStats>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("radv sender shutting down");
                return;
            }

            next = trigger.recv() => {
                if next.is_none() {
                    return;
                }
                match socket.send_to(&packet, dest).await {
                    Ok(n) => {
                        stats.advertisements.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(bytes = n, "radv: advertisement sent");
                    }
                    Err(e) => {
                        stats.send_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %e, "radv: advertisement send failed");
                    }
                }
            }
        }
    }
}

/// Trigger an unsolicited advertisement now, then again after each
/// `multicast_delay`.
pub async fn pacer_loop(
    trigger: mpsc::Sender<()>,
    min: Duration,
    max: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut rng = StdRng::from_entropy();
    let mut i: u32 = 0;

    loop {
        if trigger.send(()).await.is_err() {
            return;
        }
        let delay = multicast_delay(&mut rng, i, min, max);
        i = i.saturating_add(1);
        tracing::trace!(delay_secs = delay.as_secs(), "radv: next unsolicited advertisement");

        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("radv pacer shutting down");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
