//! IPv6 router advertisement module.
//!
//! Announces the node's routed /64 on one local interface so hosts there can
//! autoconfigure mesh addresses. Runs three tasks over one raw ICMPv6
//! socket (see `tasks`) and optionally owns the subnet's gateway address
//! while it runs. Reconfiguration tears the whole pipeline down and builds
//! it again.

pub mod compose;
pub mod gateway;
pub mod iface;
pub mod pacing;
pub mod tasks;

use std::net::Ipv6Addr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use popura_core::address::{subnet_for_key, Subnet};
use popura_core::config::RAdvConfig;
use popura_core::{AdminHandlers, Module, ModuleError, NetworkEngine, PopuraConfig};

use self::gateway::{forwarding_enabled, GatewayError, GatewayIp};
use self::iface::{link_info, open_icmpv6_socket, LinkInfo};
use self::tasks::{all_nodes, listener_loop, pacer_loop, sender_loop, RAdvStats};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What the admin hook reports. Updated on start and stop.
#[derive(Debug, Default)]
struct Status {
    started: bool,
    interface: String,
    subnet: Option<Subnet>,
    gateway: Option<Ipv6Addr>,
    /// IPv6 forwarding on the interface as of the last start attempt.
    forwarding: Option<&'static str>,
}

#[derive(Default)]
struct Shared {
    status: Mutex<Status>,
    stats: Arc<RAdvStats>,
}

impl Shared {
    fn report(&self) -> serde_json::Value {
        let status = lock(&self.status);
        let (solicitations, advertisements, send_errors) = self.stats.snapshot();
        json!({
            "started": status.started,
            "interface": status.interface,
            "subnet": status.subnet.map(|s| s.to_string()),
            "gateway": status.gateway.map(|g| g.to_string()),
            "forwarding": status.forwarding,
            "solicitations": solicitations,
            "advertisements": advertisements,
            "send_errors": send_errors,
            "receive_errors": self.stats.recv_errors.load(Ordering::Relaxed),
        })
    }
}

/// A running pipeline.
struct Running {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    gateway: Option<GatewayIp>,
}

/// The router advertisement module.
#[derive(Default)]
pub struct RAdv {
    engine: Option<Arc<dyn NetworkEngine>>,
    config: RAdvConfig,
    shared: Arc<Shared>,
    running: Option<Running>,
}

impl RAdv {
    pub fn new() -> Self {
        Self::default()
    }

    fn interface_error(&self, reason: impl std::fmt::Display) -> ModuleError {
        ModuleError::Interface {
            interface: self.config.interface.clone(),
            reason: reason.to_string(),
        }
    }

    fn install_gateway(&self, link: &LinkInfo, subnet: &Subnet) -> Option<GatewayIp> {
        let mut gateway = GatewayIp::new(&link.name, link.index, subnet.gateway(), Subnet::PREFIX_LEN);
        match gateway.add() {
            Ok(()) => Some(gateway),
            Err(GatewayError::Unsupported) => {
                tracing::warn!("radv: gateway address not set, unsupported on this platform");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "radv: gateway address not set");
                None
            }
        }
    }
}

/// Warn when `interface` does not forward IPv6.
fn check_forwarding(interface: &str) -> &'static str {
    match forwarding_enabled(interface) {
        Ok(true) => "enabled",
        Ok(false) => {
            tracing::warn!(
                interface = %interface,
                "radv: IPv6 forwarding is disabled, hosts on this link will not reach the mesh"
            );
            "disabled"
        }
        Err(e) => {
            tracing::debug!(interface = %interface, error = %e, "radv: cannot read forwarding setting");
            "unknown"
        }
    }
}

impl Module for RAdv {
    fn name(&self) -> &'static str {
        "radv"
    }

    fn init(
        &mut self,
        engine: Arc<dyn NetworkEngine>,
        config: &PopuraConfig,
    ) -> Result<(), ModuleError> {
        self.engine = Some(engine);
        self.config = config.radv.clone();
        Ok(())
    }

    fn start(&mut self) -> Result<(), ModuleError> {
        let engine = self.engine.clone().ok_or(ModuleError::NotInitialized("radv"))?;
        if self.running.is_some() {
            return Ok(());
        }
        if !self.config.enable {
            tracing::debug!("radv: disabled");
            return Ok(());
        }
        if self.config.min_interval() > self.config.max_interval() {
            return Err(ModuleError::Config(
                "radv.min_interval_secs exceeds radv.max_interval_secs".to_string(),
            ));
        }

        let forwarding = check_forwarding(&self.config.interface);
        lock(&self.shared.status).forwarding = Some(forwarding);

        let link = link_info(&self.config.interface).map_err(|e| self.interface_error(format!("{e:#}")))?;
        let subnet = subnet_for_key(&engine.public_key());

        let advertisement = compose::compose(&self.config, &subnet, link.hw_addr, link.link_local);
        let packet = advertisement
            .marshal()
            .map_err(|e| ModuleError::Config(format!("cannot encode advertisement: {e}")))?;

        let socket = Arc::new(
            open_icmpv6_socket(&link).map_err(|e| self.interface_error(format!("{e:#}")))?,
        );

        let gateway = if self.config.set_gateway_ip {
            self.install_gateway(&link, &subnet)
        } else {
            None
        };

        let (shutdown, _) = broadcast::channel::<()>(1);
        let (trigger_tx, trigger_rx) = mpsc::channel::<()>(1);
        let stats = self.shared.stats.clone();

        let tasks = vec![
            tokio::spawn(listener_loop(
                socket.clone(),
                trigger_tx.clone(),
                stats.clone(),
                shutdown.subscribe(),
            )),
            tokio::spawn(sender_loop(
                socket,
                Arc::new(packet),
                all_nodes(link.index),
                trigger_rx,
                stats,
                shutdown.subscribe(),
            )),
            tokio::spawn(pacer_loop(
                trigger_tx,
                self.config.min_interval(),
                self.config.max_interval(),
                shutdown.subscribe(),
            )),
        ];

        *lock(&self.shared.status) = Status {
            started: true,
            interface: link.name.clone(),
            subnet: Some(subnet),
            gateway: gateway.as_ref().map(GatewayIp::addr),
            forwarding: Some(forwarding),
        };

        tracing::info!(
            interface = %link.name,
            subnet = %subnet,
            source = %link.link_local,
            default_router = self.config.advertise_default_router,
            dns = self.config.advertise_dns,
            "radv: started"
        );

        self.running = Some(Running {
            shutdown,
            tasks,
            gateway,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ModuleError> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };

        let _ = running.shutdown.send(());
        // Aborting as well drops each task's socket handle promptly even if a
        // task is mid-send.
        for task in &running.tasks {
            task.abort();
        }

        if let Some(gateway) = running.gateway.as_mut() {
            if let Err(e) = gateway.remove() {
                tracing::warn!(error = %e, "radv: gateway address not removed");
            }
        }

        {
            let mut status = lock(&self.shared.status);
            status.started = false;
            status.gateway = None;
        }
        tracing::info!(interface = %self.config.interface, "radv: stopped");
        Ok(())
    }

    fn update_config(&mut self, config: &PopuraConfig) -> Result<(), ModuleError> {
        self.stop()?;
        self.config = config.radv.clone();
        self.start()
    }

    fn setup_admin_handlers(&self, admin: &mut AdminHandlers) {
        let shared = self.shared.clone();
        if let Err(e) = admin.add("getRAdv", "Show router advertisement state", move |_| {
            Ok(shared.report())
        }) {
            tracing::warn!(error = %e, "radv: admin handler not registered");
        }
    }

    fn is_started(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for RAdv {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
