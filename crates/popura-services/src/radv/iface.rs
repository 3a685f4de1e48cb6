//! Interface lookup and the raw ICMPv6 socket.

use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::os::fd::AsFd;

use anyhow::{Context, Result};
use nix::ifaddrs::getifaddrs;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use popura_core::ndp::ALL_ROUTERS;

/// Hop limit Neighbor Discovery messages must carry (RFC 4861 §6.1.2).
pub const ND_HOP_LIMIT: u32 = 255;

/// What the advertiser needs to know about its interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub name: String,
    pub index: u32,
    pub hw_addr: [u8; 6],
    pub link_local: Ipv6Addr,
}

/// Get the OS interface index for a named network interface.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}

pub fn is_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

/// Look up index, hardware address and first link-local address of `name`.
pub fn link_info(name: &str) -> Result<LinkInfo> {
    let index = if_index(name)?;

    let mut hw_addr = None;
    let mut link_local = None;
    for ifa in getifaddrs().context("getifaddrs()")? {
        if ifa.interface_name != name {
            continue;
        }
        let Some(address) = ifa.address else {
            continue;
        };
        if let Some(mac) = address.as_link_addr().and_then(|l| l.addr()) {
            hw_addr.get_or_insert(mac);
        }
        if let Some(v6) = address.as_sockaddr_in6() {
            let ip = v6.ip();
            if is_link_local(&ip) {
                link_local.get_or_insert(ip);
            }
        }
    }

    let hw_addr = hw_addr.with_context(|| format!("interface '{name}' has no hardware address"))?;
    let link_local =
        link_local.with_context(|| format!("interface '{name}' has no link-local address"))?;

    Ok(LinkInfo {
        name: name.to_string(),
        index,
        hw_addr,
        link_local,
    })
}

/// Open a raw ICMPv6 socket bound to the link-local address of `link` and
/// joined to the all-routers group. The kernel fills in ICMPv6 checksums.
pub fn open_icmpv6_socket(link: &LinkInfo) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))
        .context("socket(AF_INET6, SOCK_RAW, IPPROTO_ICMPV6)")?;

    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket.set_multicast_if_v6(link.index).context("IPV6_MULTICAST_IF")?;
    socket
        .set_multicast_hops_v6(ND_HOP_LIMIT)
        .context("IPV6_MULTICAST_HOPS")?;
    socket
        .set_unicast_hops_v6(ND_HOP_LIMIT)
        .context("IPV6_UNICAST_HOPS")?;
    // Our own advertisements should not come back to the listener.
    socket.set_multicast_loop_v6(false).context("IPV6_MULTICAST_LOOP")?;
    enable_hop_limit_reporting(&socket)?;

    let bind_addr = SocketAddrV6::new(link.link_local, 0, 0, link.index);
    socket.bind(&bind_addr.into()).context("bind()")?;
    socket
        .join_multicast_v6(&ALL_ROUTERS, link.index)
        .context("IPV6_JOIN_GROUP ff02::2")?;

    // A raw socket is driven with the same datagram calls as UDP, so tokio's
    // UdpSocket can carry it.
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).context("failed to convert to tokio UdpSocket")
}

/// One datagram read by `recv_with_hop_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub len: usize,
    pub from: Option<SocketAddr>,
    /// Hop limit the packet arrived with. `None` when the socket does not
    /// report it.
    pub hop_limit: Option<u32>,
}

/// Have the kernel attach each packet's IPv6 hop limit as ancillary data.
#[cfg(target_os = "linux")]
pub fn enable_hop_limit_reporting<F: AsFd>(socket: &F) -> Result<()> {
    use nix::sys::socket::{setsockopt, sockopt};
    setsockopt(socket, sockopt::Ipv6RecvHopLimit, &true).context("IPV6_RECVHOPLIMIT")
}

#[cfg(not(target_os = "linux"))]
pub fn enable_hop_limit_reporting<F: AsFd>(_socket: &F) -> Result<()> {
    Ok(())
}

/// Receive one datagram along with its hop limit.
#[cfg(target_os = "linux")]
pub async fn recv_with_hop_limit(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<Received> {
    use std::os::fd::AsRawFd;
    use tokio::io::Interest;

    let fd = socket.as_raw_fd();
    socket
        .async_io(Interest::READABLE, || recvmsg_once(fd, &mut *buf))
        .await
}

#[cfg(target_os = "linux")]
fn recvmsg_once(fd: std::os::fd::RawFd, buf: &mut [u8]) -> io::Result<Received> {
    use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags, SockaddrStorage};
    use std::io::IoSliceMut;

    let mut iov = [IoSliceMut::new(buf)];
    let mut cmsg = nix::cmsg_space!(libc::c_int);
    let msg = recvmsg::<SockaddrStorage>(fd, &mut iov, Some(cmsg.as_mut_slice()), MsgFlags::empty())?;

    let from = msg.address.and_then(|a| {
        a.as_sockaddr_in6()
            .map(|v6| SocketAddr::from(*v6))
            .or_else(|| a.as_sockaddr_in().map(|v4| SocketAddr::from(*v4)))
    });
    let mut hop_limit = None;
    for c in msg.cmsgs()? {
        if let ControlMessageOwned::Ipv6HopLimit(h) = c {
            hop_limit = u32::try_from(h).ok();
        }
    }
    Ok(Received {
        len: msg.bytes,
        from,
        hop_limit,
    })
}

#[cfg(not(target_os = "linux"))]
pub async fn recv_with_hop_limit(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<Received> {
    let (len, from) = socket.recv_from(buf).await?;
    Ok(Received {
        len,
        from: Some(from),
        hop_limit: None,
    })
}
