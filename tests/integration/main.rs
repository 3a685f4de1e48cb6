//! Popura integration test harness.
//!
//! Tests run popurad inside real network namespaces. Requires root, built
//! binaries and the netns environment:
//!
//!   cargo build
//!   sudo ./scripts/netns-up.sh
//!   sudo cargo test --test integration
//!
//! Every test skips with a message when the environment is missing.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use popura_core::PopuraConfig;

mod gateway;
mod radv;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const NS_A: &str = "popura-a";
pub const NS_B: &str = "popura-b";
pub const VETH_A: &str = "veth-pa";
pub const VETH_B: &str = "veth-pb";

/// One daemon at a time: they share interface state.
pub static DAEMON_LOCK: Mutex<()> = Mutex::new(());

/// Run a command inside a network namespace.
/// Returns stdout as a String on success, error on non-zero exit.
pub fn netns_exec(ns: &str, args: &[&str]) -> Result<String> {
    let mut cmd = Command::new("ip");
    cmd.args(["netns", "exec", ns]);
    cmd.args(args);

    let output = cmd
        .output()
        .with_context(|| format!("failed to run: ip netns exec {ns} {args:?}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        bail!(
            "command failed in {ns}: {args:?}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    }
}

/// Check whether the netns environment is up.
pub fn netns_available() -> bool {
    Command::new("ip")
        .args(["netns", "exec", NS_A, "ip", "link", "show", VETH_A])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Path of a workspace binary. `POPURA_BIN_DIR` overrides target/debug.
pub fn bin(name: &str) -> PathBuf {
    std::env::var("POPURA_BIN_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target/debug")
        })
        .join(name)
}

/// True when namespaces and binaries are present. Prints why not otherwise.
pub fn skip_unless_ready() -> bool {
    if !netns_available() {
        eprintln!("SKIP: netns not available, run sudo ./scripts/netns-up.sh first");
        return false;
    }
    for name in ["popurad", "popura-ctl"] {
        if !bin(name).exists() {
            eprintln!("SKIP: {} not built, run cargo build first", bin(name).display());
            return false;
        }
    }
    true
}

/// Global IPv6 addresses on `iface`, sorted, without prefix length.
pub fn global_addrs(ns: &str, iface: &str) -> Result<Vec<String>> {
    let output = netns_exec(ns, &["ip", "-6", "addr", "show", "dev", iface, "scope", "global"])?;
    let mut addrs: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("inet6 "))
        .filter_map(|l| l.split_whitespace().nth(1))
        .filter_map(|a| a.split('/').next())
        .map(str::to_string)
        .collect();
    addrs.sort();
    Ok(addrs)
}

/// Generic polling helper. Calls `poll_fn` every 500ms until it returns `true`
/// or `timeout_secs` expires.
pub fn wait_for_condition<F>(timeout_secs: u64, poll_fn: F) -> Result<()>
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    while start.elapsed() < timeout {
        if poll_fn() {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(500));
    }
    bail!("condition not met within {}s", timeout_secs)
}

// ── Daemon control ────────────────────────────────────────────────────────────

/// A popurad process in a namespace with its own config file.
pub struct Daemon {
    pub ns: &'static str,
    pub port: u16,
    child: Child,
    config_dir: PathBuf,
}

impl Daemon {
    pub fn spawn(ns: &'static str, config: &PopuraConfig, args: &[&str]) -> Result<Self> {
        let config_dir = std::env::temp_dir().join(format!(
            "popura-it-{}-{}-{}",
            ns,
            std::process::id(),
            config.node.admin_port
        ));
        let config_path = config_dir.join("config.toml");
        config.write_to(&config_path)?;

        let binary = bin("popurad");
        let mut cmd = Command::new("ip");
        cmd.args(["netns", "exec", ns])
            .arg("env")
            .arg(format!("POPURA_CONFIG={}", config_path.display()))
            .arg("RUST_LOG=debug")
            .arg(&binary)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        let child = cmd.spawn().context("failed to spawn popurad")?;

        Ok(Self {
            ns,
            port: config.node.admin_port,
            child,
            config_dir,
        })
    }

    /// Run popura-ctl against this daemon and parse the JSON it prints.
    pub fn ctl(&self, hook: &str) -> Result<serde_json::Value> {
        let binary = bin("popura-ctl").to_string_lossy().into_owned();
        let port = self.port.to_string();
        let out = netns_exec(self.ns, &[binary.as_str(), "--port", &port, hook])?;
        serde_json::from_str(&out).with_context(|| format!("bad ctl output: {out}"))
    }

    pub fn wait_for_api(&self, timeout_secs: u64) -> Result<()> {
        wait_for_condition(timeout_secs, || self.ctl("getRAdv").is_ok())
    }

    /// SIGTERM and wait, so modules get to clean up.
    pub fn terminate(mut self) -> Result<()> {
        let pid = self.child.id().to_string();
        // `ip netns exec` and `env` both exec, so the child pid is popurad.
        Command::new("kill").args(["-TERM", &pid]).status()?;
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(10) {
            if self.child.try_wait()?.is_some() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }
        bail!("popurad did not exit after SIGTERM")
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.config_dir);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_namespaces_exist() {
    if !netns_available() {
        eprintln!("SKIP: netns not available, run sudo ./scripts/netns-up.sh first");
        return;
    }

    let out_a = netns_exec(NS_A, &["ip", "link", "show", VETH_A])
        .expect("veth-pa should exist in popura-a");
    assert!(out_a.contains(VETH_A), "veth-pa not found in popura-a");

    let out_b = netns_exec(NS_B, &["ip", "link", "show", VETH_B])
        .expect("veth-pb should exist in popura-b");
    assert!(out_b.contains(VETH_B), "veth-pb not found in popura-b");
}
