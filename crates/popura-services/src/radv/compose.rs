//! Router Advertisement composition.

use std::net::Ipv6Addr;
use std::time::Duration;

use popura_core::address::{Subnet, MESH_PREFIX, MESH_PREFIX_LEN};
use popura_core::config::RAdvConfig;
use popura_core::ndp::{Direction, NdpOption, Preference, RouterAdvertisement, INFINITE_LIFETIME};

pub const HOP_LIMIT: u8 = 64;
pub const PREFIX_VALID_LIFETIME: Duration = Duration::from_secs(86_400);
pub const PREFIX_PREFERRED_LIFETIME: Duration = Duration::from_secs(14_400);
/// Router lifetime when acting as default router, and mesh route lifetime otherwise.
pub const ROUTE_LIFETIME: Duration = Duration::from_secs(1_800);

/// Build the advertisement for `subnet` as seen on one interface.
///
/// Options are ordered: prefix information, then the mesh route when not
/// acting as default router, then the source link-layer address, then RDNSS.
pub fn compose(
    config: &RAdvConfig,
    subnet: &Subnet,
    hw_addr: [u8; 6],
    iface_addr: Ipv6Addr,
) -> RouterAdvertisement {
    let mut options = vec![NdpOption::PrefixInformation {
        prefix: subnet.network(),
        prefix_length: Subnet::PREFIX_LEN,
        on_link: true,
        autonomous: true,
        valid_lifetime: PREFIX_VALID_LIFETIME,
        preferred_lifetime: PREFIX_PREFERRED_LIFETIME,
    }];

    let router_lifetime = if config.advertise_default_router {
        ROUTE_LIFETIME
    } else {
        options.push(NdpOption::RouteInformation {
            prefix: MESH_PREFIX,
            prefix_length: MESH_PREFIX_LEN,
            preference: Preference::Medium,
            route_lifetime: ROUTE_LIFETIME,
        });
        Duration::ZERO
    };

    options.push(NdpOption::LinkLayerAddress {
        direction: Direction::Source,
        addr: hw_addr,
    });

    if config.advertise_dns {
        options.push(NdpOption::RecursiveDns {
            lifetime: INFINITE_LIFETIME,
            servers: vec![iface_addr],
        });
    }

    RouterAdvertisement {
        hop_limit: HOP_LIMIT,
        managed: false,
        other: false,
        preference: Preference::Medium,
        router_lifetime,
        reachable_time: Duration::ZERO,
        retransmit_timer: Duration::ZERO,
        options,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use popura_core::ndp::NdpMessage;

    const HW: [u8; 6] = [0x02, 0x00, 0x5e, 0x10, 0x20, 0x30];

    fn subnet() -> Subnet {
        Subnet::from_bytes([0x03, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07])
    }

    fn link_local() -> Ipv6Addr {
        "fe80::1".parse().unwrap()
    }

    fn config(default_router: bool, dns: bool) -> RAdvConfig {
        RAdvConfig {
            enable: true,
            interface: "eth0".to_string(),
            advertise_default_router: default_router,
            advertise_dns: dns,
            ..RAdvConfig::default()
        }
    }

    fn route_infos(ra: &RouterAdvertisement) -> usize {
        ra.options
            .iter()
            .filter(|o| matches!(o, NdpOption::RouteInformation { .. }))
            .count()
    }

    #[test]
    fn mesh_route_only_when_not_default_router() {
        let ra = compose(&config(false, false), &subnet(), HW, link_local());
        assert_eq!(ra.router_lifetime, Duration::ZERO);
        assert_eq!(route_infos(&ra), 1);
        assert!(ra.options.contains(&NdpOption::RouteInformation {
            prefix: "200::".parse().unwrap(),
            prefix_length: 7,
            preference: Preference::Medium,
            route_lifetime: ROUTE_LIFETIME,
        }));

        let ra = compose(&config(true, false), &subnet(), HW, link_local());
        assert_eq!(ra.router_lifetime, ROUTE_LIFETIME);
        assert_eq!(route_infos(&ra), 0);
    }

    #[test]
    fn prefix_and_link_layer_always_present() {
        for (router, dns) in [(false, false), (true, false), (false, true), (true, true)] {
            let ra = compose(&config(router, dns), &subnet(), HW, link_local());
            assert_eq!(ra.hop_limit, 64);
            assert!(!ra.managed && !ra.other);
            assert_eq!(ra.preference, Preference::Medium);
            assert_eq!(
                ra.options[0],
                NdpOption::PrefixInformation {
                    prefix: "301:203:405:607::".parse().unwrap(),
                    prefix_length: 64,
                    on_link: true,
                    autonomous: true,
                    valid_lifetime: Duration::from_secs(86_400),
                    preferred_lifetime: Duration::from_secs(14_400),
                }
            );
            assert!(ra.options.contains(&NdpOption::LinkLayerAddress {
                direction: Direction::Source,
                addr: HW,
            }));
        }
    }

    #[test]
    fn rdnss_points_at_interface_address() {
        let ra = compose(&config(false, false), &subnet(), HW, link_local());
        assert!(!ra
            .options
            .iter()
            .any(|o| matches!(o, NdpOption::RecursiveDns { .. })));

        let ra = compose(&config(false, true), &subnet(), HW, link_local());
        assert_eq!(
            ra.options.last(),
            Some(&NdpOption::RecursiveDns {
                lifetime: Duration::from_secs(u32::MAX as u64),
                servers: vec![link_local()],
            })
        );
    }

    #[test]
    fn composed_message_survives_the_wire() {
        let ra = compose(&config(false, true), &subnet(), HW, link_local());
        let bytes = ra.marshal().unwrap();
        assert_eq!(NdpMessage::parse(&bytes).unwrap(), NdpMessage::RouterAdvertisement(ra));
    }
}
