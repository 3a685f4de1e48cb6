//! popurad: Popura mesh-node daemon.

use std::sync::Arc;

use anyhow::{Context, Result};

use popura_core::{AdminHandlers, Module, NetworkEngine, PopuraConfig};
use popura_services::autopeer::catalog::public_peers;
use popura_services::autopeer::probe::PROBE_TIMEOUT;
use popura_services::autopeer::proxy::ProxyConfig;
use popura_services::autopeer::select::{closest_peers, random_pick};
use popura_services::{AutoPeering, RAdv};

mod args;
mod links;

use args::Args;
use links::LinkTable;

/// How many of the fastest catalog peers `--withpeers` chooses from.
const GENCONF_CANDIDATES: usize = 10;

async fn genconf(withpeers: usize) -> Result<()> {
    let mut config = PopuraConfig::default();
    if withpeers > 0 {
        let proxy = ProxyConfig::from_env().context("invalid ALL_PROXY")?;
        let closest =
            closest_peers(public_peers(), GENCONF_CANDIDATES, proxy.as_ref(), PROBE_TIMEOUT).await;
        if closest.is_empty() {
            tracing::warn!("no public peer answered, generating config without peers");
        }
        config.node.peers = random_pick(&closest, withpeers)
            .iter()
            .map(|u| u.to_string())
            .collect();
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

fn load_config(args: &Args) -> Result<PopuraConfig> {
    if let Err(e) = PopuraConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = PopuraConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        PopuraConfig::default()
    });

    if let Some(interface) = &args.interface {
        config.radv.enable = true;
        config.radv.interface = interface.clone();
    }
    if args.autopeer && config.node.peers.is_empty() {
        config.autopeering.enable = true;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    if args.help {
        args::print_usage();
        return Ok(());
    }
    if args.genconf {
        return genconf(args.withpeers).await;
    }

    let config = load_config(&args)?;

    let public_key = match config.public_key()? {
        Some(key) => key,
        None => {
            let key: [u8; 32] = rand::random();
            tracing::info!("no public key configured, using an ephemeral one");
            key
        }
    };
    tracing::info!(
        public_key = hex::encode(public_key),
        address = %popura_core::address::addr_for_key(&public_key),
        subnet = %popura_core::address::subnet_for_key(&public_key),
        "popurad starting"
    );

    // ── Engine ───────────────────────────────────────────────────────────────
    let links = Arc::new(LinkTable::new(public_key));
    let engine: Arc<dyn NetworkEngine> = links.clone();

    for peer in &config.node.peers {
        let uri = match url::Url::parse(peer) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "skipping malformed static peer");
                continue;
            }
        };
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.call_peer(uri.clone()).await {
                tracing::warn!(peer = %uri, error = %e, "static peer dial failed");
            }
        });
    }

    // ── Modules ──────────────────────────────────────────────────────────────
    let mut modules: Vec<Box<dyn Module>> = vec![Box::new(AutoPeering::new()), Box::new(RAdv::new())];
    let mut admin = AdminHandlers::new();

    for module in modules.iter_mut() {
        if let Err(e) = module.init(engine.clone(), &config) {
            tracing::error!(module = module.name(), error = %e, "module init failed");
            continue;
        }
        module.setup_admin_handlers(&mut admin);
        if let Err(e) = module.start() {
            tracing::error!(module = module.name(), error = %e, "module failed to start");
        }
    }
    tracing::info!(
        started = ?modules.iter().filter(|m| m.is_started()).map(|m| m.name()).collect::<Vec<_>>(),
        "modules ready"
    );

    // ── Admin API ────────────────────────────────────────────────────────────
    let api_task = if config.node.admin_port != 0 {
        let state = popura_api::ApiState::new(admin);
        let port = config.node.admin_port;
        Some(tokio::spawn(async move {
            if let Err(e) = popura_api::serve(state, port).await {
                tracing::error!(error = %e, "admin API failed");
            }
        }))
    } else {
        None
    };

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let mut shutdown_rx = shutdown_tx.subscribe();
    let _ = shutdown_rx.recv().await;
    tracing::info!("shutting down");

    for module in modules.iter_mut().rev() {
        if let Err(e) = module.stop() {
            tracing::warn!(module = module.name(), error = %e, "module stop failed");
        }
    }
    if let Some(task) = api_task {
        task.abort();
    }
    links.close_all();

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot watch SIGTERM");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
