//! Mesh addressing: node address and routed subnet derived from a public key.
//!
//! The mesh owns `200::/7`. A node's address lives in `200::/8` and its routed
//! subnet in `300::/8`. Both are built from the bitwise inverse of the node's
//! ed25519 public key: the count of leading one bits goes in the second byte,
//! the bits after the first zero fill the rest.

use std::fmt;
use std::net::Ipv6Addr;

/// Network prefix byte for node addresses.
pub const ADDRESS_PREFIX: u8 = 0x02;

/// The whole mesh range, advertised as a route to LAN hosts.
pub const MESH_PREFIX: Ipv6Addr = Ipv6Addr::new(0x0200, 0, 0, 0, 0, 0, 0, 0);
pub const MESH_PREFIX_LEN: u8 = 7;

/// A node's routed /64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet([u8; 8]);

impl Subnet {
    pub const PREFIX_LEN: u8 = 64;

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// The network address, host part all zero.
    pub fn network(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets[..8].copy_from_slice(&self.0);
        Ipv6Addr::from(octets)
    }

    /// The gateway address: network address with host part set to 1.
    pub fn gateway(&self) -> Ipv6Addr {
        let mut octets = self.network().octets();
        octets[15] = 1;
        Ipv6Addr::from(octets)
    }

    pub fn contains(&self, addr: &Ipv6Addr) -> bool {
        addr.octets()[..8] == self.0
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), Self::PREFIX_LEN)
    }
}

/// Derive the node address for `public_key`.
pub fn addr_for_key(public_key: &[u8; 32]) -> Ipv6Addr {
    let mut inverted = *public_key;
    for b in inverted.iter_mut() {
        *b = !*b;
    }

    let mut ones: u8 = 0;
    let mut done = false;
    let mut bits: u8 = 0;
    let mut n_bits = 0;
    let mut tail = Vec::with_capacity(32);

    for idx in 0..inverted.len() * 8 {
        let bit = (inverted[idx / 8] >> (7 - (idx % 8))) & 1;
        if !done {
            if bit != 0 {
                ones = ones.wrapping_add(1);
            } else {
                done = true;
            }
            continue;
        }
        bits = (bits << 1) | bit;
        n_bits += 1;
        if n_bits == 8 {
            n_bits = 0;
            tail.push(bits);
            bits = 0;
        }
    }

    let mut octets = [0u8; 16];
    octets[0] = ADDRESS_PREFIX;
    octets[1] = ones;
    let n = tail.len().min(14);
    octets[2..2 + n].copy_from_slice(&tail[..n]);
    Ipv6Addr::from(octets)
}

/// Derive the routed subnet for `public_key`.
pub fn subnet_for_key(public_key: &[u8; 32]) -> Subnet {
    let addr = addr_for_key(public_key).octets();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&addr[..8]);
    prefix[0] |= 0x01;
    Subnet(prefix)
}

/// True if `addr` falls inside the mesh range.
pub fn is_mesh_address(addr: &Ipv6Addr) -> bool {
    addr.octets()[0] & 0xfe == ADDRESS_PREFIX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ones_key_maps_to_prefix_only() {
        // Inverse is all zeros: no leading ones, nothing but zeros after.
        let addr = addr_for_key(&[0xff; 32]);
        assert_eq!(addr, "200::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(subnet_for_key(&[0xff; 32]).network(), "300::".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn leading_ones_are_counted() {
        let mut key = [0xff; 32];
        key[0] = 0x3f; // inverse 0xc0: two leading ones, then zeros
        let addr = addr_for_key(&key);
        assert_eq!(addr.octets()[1], 2);
        assert_eq!(addr, "202::".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn bits_after_first_zero_follow_the_count() {
        let mut key = [0xff; 32];
        // inverse 0b1011_0000 0b1000_0000: one leading one, then 0 marks the end,
        // then tail bits 1 1 0 0 0 0 | 1 0 ...
        key[0] = !0b1011_0000;
        key[1] = !0b1000_0000;
        let addr = addr_for_key(&key);
        assert_eq!(addr.octets()[1], 1);
        assert_eq!(addr.octets()[2], 0b1100_0010);
    }

    #[test]
    fn subnet_shares_address_prefix() {
        let key = [0x42; 32];
        let addr = addr_for_key(&key).octets();
        let subnet = subnet_for_key(&key);
        assert_eq!(subnet.as_bytes()[0], 0x03);
        assert_eq!(&subnet.as_bytes()[1..], &addr[1..8]);
        assert!(is_mesh_address(&subnet.network()));
        assert!(is_mesh_address(&addr_for_key(&key)));
    }

    #[test]
    fn gateway_is_host_one_of_subnet() {
        let subnet = Subnet::from_bytes([0x03, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);
        let gw = subnet.gateway();
        assert_eq!(gw, "311:2233:4455:6677::1".parse::<Ipv6Addr>().unwrap());
        assert!(subnet.contains(&gw));
        assert_eq!(subnet.to_string(), "311:2233:4455:6677::/64");
    }

    #[test]
    fn non_mesh_addresses_are_rejected() {
        assert!(!is_mesh_address(&"fe80::1".parse().unwrap()));
        assert!(!is_mesh_address(&"2001:db8::1".parse().unwrap()));
    }
}
