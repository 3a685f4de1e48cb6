//! Neighbor Discovery wire format (RFC 4861, RFC 4191, RFC 8106).
//!
//! Only the messages the router-advertisement engine speaks are modelled:
//! Router Solicitation in, Router Advertisement out. Fixed-size parts are
//! `#[repr(C)]` structs of single-byte-aligned fields with zerocopy derives,
//! so they encode and decode without manual offset arithmetic.
//!
//! The ICMPv6 checksum is left zero on encode. Raw ICMPv6 sockets have the
//! kernel fill it in (RFC 3542 §3.1).

use std::net::Ipv6Addr;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{NetworkEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

pub const ICMPV6_ROUTER_SOLICITATION: u8 = 133;
pub const ICMPV6_ROUTER_ADVERTISEMENT: u8 = 134;

pub const OPT_SOURCE_LINK_LAYER_ADDRESS: u8 = 1;
pub const OPT_TARGET_LINK_LAYER_ADDRESS: u8 = 2;
pub const OPT_PREFIX_INFORMATION: u8 = 3;
pub const OPT_ROUTE_INFORMATION: u8 = 24;
pub const OPT_RECURSIVE_DNS_SERVER: u8 = 25;

/// All-nodes link-local multicast group, destination of every advertisement.
pub const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// All-routers link-local multicast group, destination of solicitations.
pub const ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

/// Lifetime value meaning "forever" in prefix and RDNSS options.
pub const INFINITE_LIFETIME: Duration = Duration::from_secs(u32::MAX as u64);

const FLAG_MANAGED: u8 = 0x80;
const FLAG_OTHER: u8 = 0x40;
const FLAG_ON_LINK: u8 = 0x80;
const FLAG_AUTONOMOUS: u8 = 0x40;

// ── Fixed headers ─────────────────────────────────────────────────────────────

/// Router Advertisement fixed part, including the ICMPv6 header.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct RaHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: U16<NetworkEndian>,
    pub cur_hop_limit: u8,
    /// M (0x80), O (0x40), router preference in bits 3-4.
    pub flags: u8,
    /// Seconds. 0 = not a default router.
    pub router_lifetime: U16<NetworkEndian>,
    /// Milliseconds.
    pub reachable_time: U32<NetworkEndian>,
    /// Milliseconds.
    pub retrans_timer: U32<NetworkEndian>,
}

assert_eq_size!(RaHeader, [u8; 16]);

/// Router Solicitation fixed part.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct RsHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: U16<NetworkEndian>,
    pub reserved: U32<NetworkEndian>,
}

assert_eq_size!(RsHeader, [u8; 8]);

/// Prefix Information option, type 3.
///
/// Wire size: 32 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct PrefixInfoWire {
    pub kind: u8,
    /// In units of 8 bytes. Always 4.
    pub length: u8,
    pub prefix_length: u8,
    /// L (0x80), A (0x40).
    pub flags: u8,
    pub valid_lifetime: U32<NetworkEndian>,
    pub preferred_lifetime: U32<NetworkEndian>,
    pub reserved: U32<NetworkEndian>,
    pub prefix: [u8; 16],
}

assert_eq_size!(PrefixInfoWire, [u8; 32]);

/// Route Information option header, type 24. The prefix follows, 0/8/16 bytes.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct RouteInfoWire {
    pub kind: u8,
    pub length: u8,
    pub prefix_length: u8,
    /// Route preference in bits 3-4.
    pub flags: u8,
    pub route_lifetime: U32<NetworkEndian>,
}

assert_eq_size!(RouteInfoWire, [u8; 8]);

/// Recursive DNS Server option header, type 25. Addresses follow.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct RdnssWire {
    pub kind: u8,
    pub length: u8,
    pub reserved: U16<NetworkEndian>,
    pub lifetime: U32<NetworkEndian>,
}

assert_eq_size!(RdnssWire, [u8; 8]);

// ── Model ─────────────────────────────────────────────────────────────────────

/// Default router / route preference (RFC 4191 §2.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Preference {
    High,
    #[default]
    Medium,
    Low,
}

impl Preference {
    fn bits(self) -> u8 {
        match self {
            Preference::High => 0b01,
            Preference::Medium => 0b00,
            Preference::Low => 0b11,
        }
    }

    /// The reserved value 0b10 is treated as Medium, as RFC 4191 requires.
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b01 => Preference::High,
            0b11 => Preference::Low,
            _ => Preference::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Direction {
    Source,
    Target,
}

/// One option of a Neighbor Discovery message, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NdpOption {
    PrefixInformation {
        prefix: Ipv6Addr,
        prefix_length: u8,
        on_link: bool,
        autonomous: bool,
        valid_lifetime: Duration,
        preferred_lifetime: Duration,
    },
    RouteInformation {
        prefix: Ipv6Addr,
        prefix_length: u8,
        preference: Preference,
        route_lifetime: Duration,
    },
    LinkLayerAddress {
        direction: Direction,
        addr: [u8; 6],
    },
    RecursiveDns {
        lifetime: Duration,
        servers: Vec<Ipv6Addr>,
    },
    /// Anything else, kept verbatim minus the type/length bytes.
    Unknown { kind: u8, body: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterAdvertisement {
    pub hop_limit: u8,
    pub managed: bool,
    pub other: bool,
    pub preference: Preference,
    pub router_lifetime: Duration,
    pub reachable_time: Duration,
    pub retransmit_timer: Duration,
    pub options: Vec<NdpOption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NdpMessage {
    RouterSolicitation { options: Vec<NdpOption> },
    RouterAdvertisement(RouterAdvertisement),
    /// A valid ICMPv6 message this engine has no use for.
    Other { icmp_type: u8 },
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("message truncated: {0} bytes")]
    Truncated(usize),

    #[error("option of type {kind} has zero length")]
    ZeroLengthOption { kind: u8 },

    #[error("option of type {kind} overruns the message")]
    OptionOverrun { kind: u8 },

    #[error("option of type {kind} has invalid length {length}")]
    BadOptionLength { kind: u8, length: u8 },

    #[error("non-zero code {code} for ICMPv6 type {icmp_type}")]
    BadCode { icmp_type: u8, code: u8 },

    #[error("prefix length {0} out of range")]
    BadPrefixLength(u8),
}

// ── Encoding ──────────────────────────────────────────────────────────────────

fn secs_u32(d: Duration) -> u32 {
    u32::try_from(d.as_secs()).unwrap_or(u32::MAX)
}

fn secs_u16(d: Duration) -> u16 {
    u16::try_from(d.as_secs()).unwrap_or(u16::MAX)
}

fn millis_u32(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

impl RouterAdvertisement {
    /// Encode as an ICMPv6 message body (no IPv6 header, zero checksum).
    pub fn marshal(&self) -> Result<Vec<u8>, WireError> {
        let mut flags = self.preference.bits() << 3;
        if self.managed {
            flags |= FLAG_MANAGED;
        }
        if self.other {
            flags |= FLAG_OTHER;
        }

        let header = RaHeader {
            icmp_type: ICMPV6_ROUTER_ADVERTISEMENT,
            code: 0,
            checksum: U16::new(0),
            cur_hop_limit: self.hop_limit,
            flags,
            router_lifetime: U16::new(secs_u16(self.router_lifetime)),
            reachable_time: U32::new(millis_u32(self.reachable_time)),
            retrans_timer: U32::new(millis_u32(self.retransmit_timer)),
        };

        let mut buf = BytesMut::with_capacity(128);
        buf.put_slice(header.as_bytes());
        for option in &self.options {
            option.marshal_into(&mut buf)?;
        }
        Ok(buf.to_vec())
    }
}

impl NdpOption {
    fn marshal_into(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        match self {
            NdpOption::PrefixInformation {
                prefix,
                prefix_length,
                on_link,
                autonomous,
                valid_lifetime,
                preferred_lifetime,
            } => {
                if *prefix_length > 128 {
                    return Err(WireError::BadPrefixLength(*prefix_length));
                }
                let mut flags = 0;
                if *on_link {
                    flags |= FLAG_ON_LINK;
                }
                if *autonomous {
                    flags |= FLAG_AUTONOMOUS;
                }
                let wire = PrefixInfoWire {
                    kind: OPT_PREFIX_INFORMATION,
                    length: 4,
                    prefix_length: *prefix_length,
                    flags,
                    valid_lifetime: U32::new(secs_u32(*valid_lifetime)),
                    preferred_lifetime: U32::new(secs_u32(*preferred_lifetime)),
                    reserved: U32::new(0),
                    prefix: prefix.octets(),
                };
                buf.put_slice(wire.as_bytes());
            }
            NdpOption::RouteInformation {
                prefix,
                prefix_length,
                preference,
                route_lifetime,
            } => {
                // Only as many prefix bytes as the length needs (RFC 4191 §2.3).
                let prefix_bytes = match *prefix_length {
                    0 => 0,
                    1..=64 => 8,
                    65..=128 => 16,
                    other => return Err(WireError::BadPrefixLength(other)),
                };
                let wire = RouteInfoWire {
                    kind: OPT_ROUTE_INFORMATION,
                    length: 1 + (prefix_bytes / 8) as u8,
                    prefix_length: *prefix_length,
                    flags: preference.bits() << 3,
                    route_lifetime: U32::new(secs_u32(*route_lifetime)),
                };
                buf.put_slice(wire.as_bytes());
                buf.put_slice(&prefix.octets()[..prefix_bytes]);
            }
            NdpOption::LinkLayerAddress { direction, addr } => {
                let kind = match direction {
                    Direction::Source => OPT_SOURCE_LINK_LAYER_ADDRESS,
                    Direction::Target => OPT_TARGET_LINK_LAYER_ADDRESS,
                };
                buf.put_u8(kind);
                buf.put_u8(1);
                buf.put_slice(addr);
            }
            NdpOption::RecursiveDns { lifetime, servers } => {
                let length = servers
                    .len()
                    .checked_mul(2)
                    .and_then(|n| u8::try_from(n + 1).ok())
                    .ok_or(WireError::BadOptionLength {
                        kind: OPT_RECURSIVE_DNS_SERVER,
                        length: u8::MAX,
                    })?;
                let wire = RdnssWire {
                    kind: OPT_RECURSIVE_DNS_SERVER,
                    length,
                    reserved: U16::new(0),
                    lifetime: U32::new(secs_u32(*lifetime)),
                };
                buf.put_slice(wire.as_bytes());
                for server in servers {
                    buf.put_slice(&server.octets());
                }
            }
            NdpOption::Unknown { kind, body } => {
                let total = body.len() + 2;
                if total % 8 != 0 || total / 8 > u8::MAX as usize {
                    return Err(WireError::BadOptionLength {
                        kind: *kind,
                        length: (total / 8) as u8,
                    });
                }
                buf.put_u8(*kind);
                buf.put_u8((total / 8) as u8);
                buf.put_slice(body);
            }
        }
        Ok(())
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

impl NdpMessage {
    /// Decode an ICMPv6 message as delivered by a raw ICMPv6 socket.
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < 4 {
            return Err(WireError::Truncated(buf.len()));
        }
        let (icmp_type, code) = (buf[0], buf[1]);
        match icmp_type {
            ICMPV6_ROUTER_SOLICITATION => {
                if code != 0 {
                    return Err(WireError::BadCode { icmp_type, code });
                }
                RsHeader::read_from_prefix(buf).ok_or(WireError::Truncated(buf.len()))?;
                let options = parse_options(&buf[std::mem::size_of::<RsHeader>()..])?;
                Ok(NdpMessage::RouterSolicitation { options })
            }
            ICMPV6_ROUTER_ADVERTISEMENT => {
                if code != 0 {
                    return Err(WireError::BadCode { icmp_type, code });
                }
                let header =
                    RaHeader::read_from_prefix(buf).ok_or(WireError::Truncated(buf.len()))?;
                let options = parse_options(&buf[std::mem::size_of::<RaHeader>()..])?;
                Ok(NdpMessage::RouterAdvertisement(RouterAdvertisement {
                    hop_limit: header.cur_hop_limit,
                    managed: header.flags & FLAG_MANAGED != 0,
                    other: header.flags & FLAG_OTHER != 0,
                    preference: Preference::from_bits(header.flags >> 3),
                    router_lifetime: Duration::from_secs(header.router_lifetime.get() as u64),
                    reachable_time: Duration::from_millis(header.reachable_time.get() as u64),
                    retransmit_timer: Duration::from_millis(header.retrans_timer.get() as u64),
                    options,
                }))
            }
            other => Ok(NdpMessage::Other { icmp_type: other }),
        }
    }
}

fn parse_options(mut buf: &[u8]) -> Result<Vec<NdpOption>, WireError> {
    let mut options = Vec::new();
    while !buf.is_empty() {
        if buf.len() < 2 {
            return Err(WireError::Truncated(buf.len()));
        }
        let (kind, length) = (buf[0], buf[1]);
        if length == 0 {
            return Err(WireError::ZeroLengthOption { kind });
        }
        let total = length as usize * 8;
        if total > buf.len() {
            return Err(WireError::OptionOverrun { kind });
        }
        options.push(parse_option(kind, length, &buf[..total])?);
        buf = &buf[total..];
    }
    Ok(options)
}

fn ipv6_from_prefix(bytes: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets[..bytes.len()].copy_from_slice(bytes);
    Ipv6Addr::from(octets)
}

fn parse_option(kind: u8, length: u8, raw: &[u8]) -> Result<NdpOption, WireError> {
    let bad_length = || WireError::BadOptionLength { kind, length };
    match kind {
        OPT_SOURCE_LINK_LAYER_ADDRESS | OPT_TARGET_LINK_LAYER_ADDRESS => {
            if length != 1 {
                return Err(bad_length());
            }
            let mut addr = [0u8; 6];
            addr.copy_from_slice(&raw[2..8]);
            let direction = if kind == OPT_SOURCE_LINK_LAYER_ADDRESS {
                Direction::Source
            } else {
                Direction::Target
            };
            Ok(NdpOption::LinkLayerAddress { direction, addr })
        }
        OPT_PREFIX_INFORMATION => {
            let wire = PrefixInfoWire::read_from_prefix(raw).ok_or_else(bad_length)?;
            if length != 4 {
                return Err(bad_length());
            }
            if wire.prefix_length > 128 {
                return Err(WireError::BadPrefixLength(wire.prefix_length));
            }
            Ok(NdpOption::PrefixInformation {
                prefix: Ipv6Addr::from(wire.prefix),
                prefix_length: wire.prefix_length,
                on_link: wire.flags & FLAG_ON_LINK != 0,
                autonomous: wire.flags & FLAG_AUTONOMOUS != 0,
                valid_lifetime: Duration::from_secs(wire.valid_lifetime.get() as u64),
                preferred_lifetime: Duration::from_secs(wire.preferred_lifetime.get() as u64),
            })
        }
        OPT_ROUTE_INFORMATION => {
            if length > 3 {
                return Err(bad_length());
            }
            let wire = RouteInfoWire::read_from_prefix(raw).ok_or_else(bad_length)?;
            let needed = match wire.prefix_length {
                0 => 1,
                1..=64 => 2,
                65..=128 => 3,
                other => return Err(WireError::BadPrefixLength(other)),
            };
            if length < needed {
                return Err(bad_length());
            }
            let prefix = ipv6_from_prefix(&raw[8..]);
            Ok(NdpOption::RouteInformation {
                prefix,
                prefix_length: wire.prefix_length,
                preference: Preference::from_bits(wire.flags >> 3),
                route_lifetime: Duration::from_secs(wire.route_lifetime.get() as u64),
            })
        }
        OPT_RECURSIVE_DNS_SERVER => {
            // At least one address: 1 + 2n with n ≥ 1.
            if length < 3 || length % 2 == 0 {
                return Err(bad_length());
            }
            let wire = RdnssWire::read_from_prefix(raw).ok_or_else(bad_length)?;
            let servers = raw[8..].chunks_exact(16).map(ipv6_from_prefix).collect();
            Ok(NdpOption::RecursiveDns {
                lifetime: Duration::from_secs(wire.lifetime.get() as u64),
                servers,
            })
        }
        _ => Ok(NdpOption::Unknown {
            kind,
            body: raw[2..].to_vec(),
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
