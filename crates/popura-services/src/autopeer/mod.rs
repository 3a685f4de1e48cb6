//! Automatic Internet peering.
//!
//! Every poll interval the module looks at the engine's peer table. While at
//! least one peer is connected over something other than a link-local
//! address, nothing happens. Once the node has been without such a peer for
//! longer than the configured timeout, the catalog is probed, one of the ten
//! fastest peers is picked at random and the engine is asked to connect to it.
//!
//! The check is a scheduled task that re-arms itself after each run. `stop`
//! aborts the pending run only. A run already in progress finishes its probe
//! round but does not call the engine.

pub mod catalog;
pub mod probe;
pub mod proxy;
pub mod select;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde_json::json;
use tokio::task::AbortHandle;
use url::Url;

use popura_core::config::AutoPeeringConfig;
use popura_core::{AdminHandlers, Module, ModuleError, NetworkEngine, PeerInfo, PopuraConfig};

use self::probe::PROBE_TIMEOUT;
use self::proxy::ProxyConfig;
use self::select::{closest_peers, random_pick};

/// Remote endpoints starting with this are on the local segment and do not
/// count as Internet peers.
pub const LINK_LOCAL_PREFIX: &str = "fe80";

/// True if `remote` is a link-local endpoint. Accepts bare addresses,
/// bracketed addresses and `scheme://` forms.
pub fn is_link_local(remote: &str) -> bool {
    let rest = remote.split_once("://").map_or(remote, |(_, r)| r);
    let rest = rest.trim_start_matches('[');
    rest.get(..LINK_LOCAL_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(LINK_LOCAL_PREFIX))
}

/// True if any peer in the table is reached over a routable address.
pub fn has_internet_peers(peers: &[PeerInfo]) -> bool {
    peers.iter().any(|p| !is_link_local(&p.remote))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct LoopState {
    /// Last time an Internet peer was seen. `None` = never.
    had_peers: Option<Instant>,
    last_candidate: Option<Url>,
    attempts: u64,
}

struct Inner {
    engine: Arc<dyn NetworkEngine>,
    catalog: Vec<Url>,
    proxy: Option<ProxyConfig>,
    config: Mutex<AutoPeeringConfig>,
    state: Mutex<LoopState>,
    /// Bumped on every start and stop. A run belongs to one generation and
    /// goes quiet once the generation moves on.
    generation: AtomicU64,
    started: AtomicBool,
    pending: Mutex<Option<AbortHandle>>,
    probe_timeout: Duration,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.started.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Schedule the next check after the poll interval.
    fn arm(self: &Arc<Self>, generation: u64) {
        let delay = lock(&self.config).poll_interval();
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The check runs as its own task so aborting this timer never
            // cancels a check that has already begun.
            tokio::spawn(inner.run(generation));
        });
        if let Some(old) = lock(&self.pending).replace(handle.abort_handle()) {
            old.abort();
        }
    }

    fn run(self: Arc<Self>, generation: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if !self.is_current(generation) {
                return;
            }
            self.check_peers(generation).await;
            if self.is_current(generation) {
                self.arm(generation);
            }
        })
    }

    async fn check_peers(&self, generation: u64) {
        let (timeout, max_candidates) = {
            let config = lock(&self.config);
            (config.timeout(), config.max_candidates)
        };

        {
            let mut state = lock(&self.state);
            if has_internet_peers(&self.engine.peers()) {
                state.had_peers = Some(Instant::now());
                return;
            }
            let overdue = state.had_peers.map_or(true, |t| t.elapsed() > timeout);
            if !overdue {
                return;
            }
            state.had_peers = Some(Instant::now());
        }

        tracing::debug!(candidates = self.catalog.len(), "autopeering: no peers, probing catalog");
        let closest =
            closest_peers(&self.catalog, max_candidates, self.proxy.as_ref(), self.probe_timeout)
                .await;

        if !self.is_current(generation) {
            tracing::debug!("autopeering: stopped during probe, discarding result");
            return;
        }

        let Some(chosen) = random_pick(&closest, 1).into_iter().next() else {
            tracing::warn!("autopeering: no catalog peer is reachable");
            return;
        };

        let uri = match self.peer_uri(&chosen) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(peer = %chosen, error = %e, "autopeering: rejecting peer");
                return;
            }
        };

        {
            let mut state = lock(&self.state);
            state.last_candidate = Some(uri.clone());
            state.attempts += 1;
        }

        tracing::info!(peer = %uri, "autopeering: adding new peer");
        if let Err(e) = self.engine.call_peer(uri.clone()).await {
            tracing::info!(peer = %uri, error = %e, "autopeering: failed to connect to peer");
        }
    }

    /// Peer URI as handed to the engine, routed through the proxy if one is set.
    fn peer_uri(&self, peer: &Url) -> Result<Url, proxy::ProxyError> {
        match &self.proxy {
            Some(p) => p.rewrite(peer),
            None => Ok(peer.clone()),
        }
    }

    fn status(&self) -> serde_json::Value {
        let state = lock(&self.state);
        json!({
            "started": self.started.load(Ordering::SeqCst),
            "seconds_since_had_peers": state.had_peers.map(|t| t.elapsed().as_secs()),
            "last_candidate": state.last_candidate.as_ref().map(Url::to_string),
            "attempts": state.attempts,
            "catalog_size": self.catalog.len(),
            "proxy": self.proxy.as_ref().map(|p| p.url().to_string()),
        })
    }
}

/// The autopeering module.
pub struct AutoPeering {
    inner: Option<Arc<Inner>>,
    catalog_override: Option<Vec<Url>>,
    proxy_override: Option<ProxyConfig>,
    probe_timeout: Duration,
}

impl Default for AutoPeering {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoPeering {
    pub fn new() -> Self {
        Self {
            inner: None,
            catalog_override: None,
            proxy_override: None,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    /// Use `catalog` instead of the embedded public peers.
    pub fn with_catalog(mut self, catalog: Vec<Url>) -> Self {
        self.catalog_override = Some(catalog);
        self
    }

    /// Use `proxy` instead of reading `ALL_PROXY` at init.
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy_override = Some(proxy);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Connection attempts made since init.
    pub fn attempts(&self) -> u64 {
        self.inner
            .as_ref()
            .map(|i| lock(&i.state).attempts)
            .unwrap_or(0)
    }

    fn inner(&self) -> Result<&Arc<Inner>, ModuleError> {
        self.inner.as_ref().ok_or(ModuleError::NotInitialized("autopeering"))
    }
}

impl Module for AutoPeering {
    fn name(&self) -> &'static str {
        "autopeering"
    }

    fn init(
        &mut self,
        engine: Arc<dyn NetworkEngine>,
        config: &PopuraConfig,
    ) -> Result<(), ModuleError> {
        let proxy = match &self.proxy_override {
            Some(p) => Some(p.clone()),
            None => ProxyConfig::from_env().map_err(|e| ModuleError::Config(e.to_string()))?,
        };

        let catalog = match (&self.catalog_override, &proxy) {
            (Some(c), _) => c.clone(),
            // A SOCKS proxy can only carry plain TCP peers.
            (None, Some(_)) => catalog::tcp_peers(),
            (None, None) => catalog::public_peers().to_vec(),
        };

        if let Some(p) = &proxy {
            tracing::info!(proxy = %p.url(), "autopeering: using forward proxy");
        }

        self.inner = Some(Arc::new(Inner {
            engine,
            catalog,
            proxy,
            config: Mutex::new(config.autopeering.clone()),
            state: Mutex::new(LoopState::default()),
            generation: AtomicU64::new(0),
            started: AtomicBool::new(false),
            pending: Mutex::new(None),
            probe_timeout: self.probe_timeout,
        }));
        Ok(())
    }

    fn start(&mut self) -> Result<(), ModuleError> {
        let inner = self.inner()?;
        if !lock(&inner.config).enable {
            tracing::debug!("autopeering: disabled");
            return Ok(());
        }
        if inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(Arc::clone(inner).run(generation));
        tracing::info!("autopeering: module started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ModuleError> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        if !inner.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(pending) = lock(&inner.pending).take() {
            pending.abort();
        }
        tracing::info!("autopeering: module stopped");
        Ok(())
    }

    fn update_config(&mut self, config: &PopuraConfig) -> Result<(), ModuleError> {
        self.stop()?;
        *lock(&self.inner()?.config) = config.autopeering.clone();
        self.start()
    }

    fn setup_admin_handlers(&self, admin: &mut AdminHandlers) {
        let Some(inner) = self.inner.clone() else {
            tracing::debug!("autopeering: not initialised, no admin handlers");
            return;
        };
        if let Err(e) = admin.add(
            "getAutoPeering",
            "Show autopeering state",
            move |_| Ok(inner.status()),
        ) {
            tracing::warn!(error = %e, "autopeering: admin handler not registered");
        }
    }

    fn is_started(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|i| i.started.load(Ordering::SeqCst))
    }
}
