use crate::*;

use popura_core::address::subnet_for_key;
use popura_core::PopuraConfig;

const KEY: [u8; 32] = [0x3c; 32];

fn config(port: u16) -> PopuraConfig {
    let mut config = PopuraConfig::default();
    config.node.public_key = hex::encode(KEY);
    config.node.admin_port = port;
    config.radv.enable = true;
    config.radv.interface = VETH_A.to_string();
    config
}

/// A host on the other end of the link autoconfigures an address inside the
/// advertised subnet from the first unsolicited advertisement.
#[test]
fn test_neighbour_autoconfigures_from_advertisement() {
    if !skip_unless_ready() {
        return;
    }
    let _lock = DAEMON_LOCK.lock().unwrap_or_else(|p| p.into_inner());

    let subnet = subnet_for_key(&KEY);
    let in_subnet = |addrs: &[String]| {
        addrs
            .iter()
            .filter_map(|a| a.parse::<std::net::Ipv6Addr>().ok())
            .any(|a| subnet.contains(&a))
    };

    // Make sure B accepts advertisements and starts clean.
    let _ = netns_exec(NS_B, &["sysctl", "-w", &format!("net.ipv6.conf.{VETH_B}.accept_ra=2")]);
    let _ = netns_exec(NS_B, &["ip", "-6", "addr", "flush", "dev", VETH_B, "scope", "global"]);

    let daemon = Daemon::spawn(NS_A, &config(19111), &[]).expect("spawn popurad");
    daemon.wait_for_api(20).expect("admin API up");

    let result = wait_for_condition(30, || {
        global_addrs(NS_B, VETH_B)
            .map(|a| in_subnet(&a))
            .unwrap_or(false)
    });

    let status = daemon.ctl("getRAdv").expect("getRAdv");
    assert_eq!(status["subnet"], subnet.to_string());
    assert!(status["advertisements"].as_u64().unwrap_or(0) >= 1);

    daemon.terminate().expect("clean shutdown");
    let _ = netns_exec(NS_B, &["ip", "-6", "addr", "flush", "dev", VETH_B, "scope", "global"]);
    result.expect("no address from the advertised prefix on veth-pb");
}

/// A router solicitation from the neighbour is answered, so the
/// advertisement counter moves without waiting for the pacer.
#[test]
fn test_solicitation_is_answered() {
    if !skip_unless_ready() {
        return;
    }
    let _lock = DAEMON_LOCK.lock().unwrap_or_else(|p| p.into_inner());

    let daemon = Daemon::spawn(NS_A, &config(19112), &[]).expect("spawn popurad");
    daemon.wait_for_api(20).expect("admin API up");

    // Toggling the link makes B send router solicitations.
    let _ = netns_exec(NS_B, &["ip", "link", "set", "dev", VETH_B, "down"]);
    let _ = netns_exec(NS_B, &["ip", "link", "set", "dev", VETH_B, "up"]);

    wait_for_condition(20, || {
        daemon
            .ctl("getRAdv")
            .map(|s| s["solicitations"].as_u64().unwrap_or(0) >= 1)
            .unwrap_or(false)
    })
    .expect("no router solicitation seen");

    let status = daemon.ctl("getRAdv").expect("getRAdv");
    assert!(status["advertisements"].as_u64().unwrap_or(0) >= 2);

    daemon.terminate().expect("clean shutdown");
}
