use crate::*;

use anyhow::Result;
use popura_core::address::subnet_for_key;
use popura_core::PopuraConfig;

const KEY: [u8; 32] = [0x5a; 32];

fn radv_config(port: u16, set_gateway_ip: bool) -> PopuraConfig {
    let mut config = PopuraConfig::default();
    config.node.public_key = hex::encode(KEY);
    config.node.admin_port = port;
    config.radv.enable = true;
    config.radv.interface = VETH_A.to_string();
    config.radv.set_gateway_ip = set_gateway_ip;
    config
}

/// The gateway address is present while popurad runs and gone after a clean
/// shutdown. Nothing else on the interface changes.
#[test]
fn test_gateway_added_and_removed() {
    if !skip_unless_ready() {
        return;
    }
    let _lock = DAEMON_LOCK.lock().unwrap_or_else(|p| p.into_inner());

    let gateway = subnet_for_key(&KEY).gateway().to_string();
    let before = global_addrs(NS_A, VETH_A).expect("list addresses");
    assert!(!before.contains(&gateway), "gateway already present before start");

    let daemon = Daemon::spawn(NS_A, &radv_config(19101, true), &[]).expect("spawn popurad");
    daemon.wait_for_api(20).expect("admin API up");

    wait_for_condition(10, || {
        global_addrs(NS_A, VETH_A)
            .map(|a| a.contains(&gateway))
            .unwrap_or(false)
    })
    .expect("gateway address added");

    let status = daemon.ctl("getRAdv").expect("getRAdv");
    assert_eq!(status["started"], true);
    assert_eq!(status["gateway"], gateway.as_str());

    daemon.terminate().expect("clean shutdown");

    let after = global_addrs(NS_A, VETH_A).expect("list addresses");
    assert_eq!(before, after, "interface addresses changed across start/stop");
}

/// An address someone else configured is left alone on shutdown.
#[test]
fn test_preexisting_gateway_is_not_removed() {
    if !skip_unless_ready() {
        return;
    }
    let _lock = DAEMON_LOCK.lock().unwrap_or_else(|p| p.into_inner());

    let gateway = subnet_for_key(&KEY).gateway().to_string();
    let cidr = format!("{gateway}/64");
    netns_exec(NS_A, &["ip", "-6", "addr", "add", &cidr, "dev", VETH_A, "nodad"])
        .expect("pre-add gateway");

    let result = (|| -> Result<()> {
        let daemon = Daemon::spawn(NS_A, &radv_config(19102, true), &[])?;
        daemon.wait_for_api(20)?;
        daemon.terminate()?;
        let after = global_addrs(NS_A, VETH_A)?;
        assert!(after.contains(&gateway), "pre-existing gateway was removed");
        Ok(())
    })();

    let _ = netns_exec(NS_A, &["ip", "-6", "addr", "del", &cidr, "dev", VETH_A]);
    result.expect("test body");
}

/// With set_gateway_ip off the interface is never touched.
#[test]
fn test_gateway_disabled_leaves_interface_alone() {
    if !skip_unless_ready() {
        return;
    }
    let _lock = DAEMON_LOCK.lock().unwrap_or_else(|p| p.into_inner());

    let before = global_addrs(NS_A, VETH_A).expect("list addresses");
    let daemon = Daemon::spawn(NS_A, &radv_config(19103, false), &[]).expect("spawn popurad");
    daemon.wait_for_api(20).expect("admin API up");

    assert_eq!(global_addrs(NS_A, VETH_A).unwrap(), before);
    let status = daemon.ctl("getRAdv").expect("getRAdv");
    assert!(status["gateway"].is_null());

    daemon.terminate().expect("clean shutdown");
    assert_eq!(global_addrs(NS_A, VETH_A).unwrap(), before);
}
