//! Reachability and latency probes.
//!
//! A probe is a bare TCP connect: no bytes are exchanged and the stream is
//! dropped as soon as it is established. All candidates are probed at once,
//! so a full round costs about one timeout regardless of catalog size.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::task::JoinSet;
use url::Url;

use super::catalog::endpoint;
use super::proxy::ProxyConfig;

/// Upper bound on a single connect attempt.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub candidate: Url,
    pub reachable: bool,
    /// Time from dial start to established connection. Zero when unreachable.
    pub latency: Duration,
}

impl ProbeResult {
    pub fn unreachable(candidate: Url) -> Self {
        Self {
            candidate,
            reachable: false,
            latency: Duration::ZERO,
        }
    }

    pub fn reachable(candidate: Url, latency: Duration) -> Self {
        Self {
            candidate,
            reachable: true,
            latency,
        }
    }
}

/// Schemes a probe knows how to dial. Both run over TCP.
pub fn is_supported(uri: &Url) -> bool {
    matches!(uri.scheme(), "tcp" | "tls")
}

/// Probe every candidate concurrently. Results come back in input order.
pub async fn probe_peers(
    candidates: &[Url],
    proxy: Option<&ProxyConfig>,
    timeout: Duration,
) -> Vec<ProbeResult> {
    let mut set = JoinSet::new();
    for (idx, candidate) in candidates.iter().cloned().enumerate() {
        let proxy = proxy.cloned();
        set.spawn(async move { (idx, probe_peer(candidate, proxy.as_ref(), timeout).await) });
    }

    let mut results = Vec::with_capacity(candidates.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(r) => results.push(r),
            Err(e) => tracing::warn!(error = %e, "probe task failed"),
        }
    }
    results.sort_by_key(|(idx, _)| *idx);
    results.into_iter().map(|(_, r)| r).collect()
}

/// Probe one candidate.
pub async fn probe_peer(
    candidate: Url,
    proxy: Option<&ProxyConfig>,
    timeout: Duration,
) -> ProbeResult {
    if !is_supported(&candidate) {
        tracing::trace!(peer = %candidate, "unsupported scheme, not probed");
        return ProbeResult::unreachable(candidate);
    }
    let Some(target) = endpoint(&candidate) else {
        return ProbeResult::unreachable(candidate);
    };

    let started = Instant::now();
    let dial = async {
        match proxy {
            Some(p) => p.connect(&target).await,
            None => TcpStream::connect(&target).await,
        }
    };

    match tokio::time::timeout(timeout, dial).await {
        Ok(Ok(stream)) => {
            let latency = started.elapsed();
            drop(stream);
            tracing::trace!(peer = %candidate, latency_ms = latency.as_millis() as u64, "peer online");
            ProbeResult::reachable(candidate, latency)
        }
        Ok(Err(e)) => {
            tracing::trace!(peer = %candidate, error = %e, "peer unreachable");
            ProbeResult::unreachable(candidate)
        }
        Err(_) => {
            tracing::trace!(peer = %candidate, "probe timed out");
            ProbeResult::unreachable(candidate)
        }
    }
}
