//! Gateway address management.
//!
//! While advertising, the node can own `<subnet>::1/64` on the interface so
//! hosts that autoconfigured from the prefix have an on-link next hop.
//! Add and remove are idempotent, and only an address this process added is
//! removed again.

use std::io;
use std::net::Ipv6Addr;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway addresses are not supported on this platform")]
    Unsupported,

    #[error("failed to open control socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to add {addr}/{prefix_len} to {interface}: {source}")]
    Add {
        interface: String,
        addr: Ipv6Addr,
        prefix_len: u8,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove {addr}/{prefix_len} from {interface}: {source}")]
    Remove {
        interface: String,
        addr: Ipv6Addr,
        prefix_len: u8,
        #[source]
        source: io::Error,
    },
}

/// One gateway address on one interface.
#[derive(Debug)]
pub struct GatewayIp {
    interface: String,
    index: u32,
    addr: Ipv6Addr,
    prefix_len: u8,
    installed: bool,
}

impl GatewayIp {
    pub fn new(interface: &str, index: u32, addr: Ipv6Addr, prefix_len: u8) -> Self {
        Self {
            interface: interface.to_string(),
            index,
            addr,
            prefix_len,
            installed: false,
        }
    }

    pub fn addr(&self) -> Ipv6Addr {
        self.addr
    }

    /// True once `add` put the address on the interface and `remove` has not
    /// yet taken it off.
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Add the address. An address that is already present counts as
    /// success, but stays owned by whoever put it there.
    pub fn add(&mut self) -> Result<(), GatewayError> {
        if self.installed {
            return Ok(());
        }
        match sys::add_address(self.index, self.addr, self.prefix_len) {
            Ok(()) => {
                self.installed = true;
                tracing::info!(interface = %self.interface, addr = %self.addr, "gateway address added");
                Ok(())
            }
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                tracing::debug!(interface = %self.interface, addr = %self.addr, "gateway address already present");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::Unsupported => Err(GatewayError::Unsupported),
            Err(source) => Err(GatewayError::Add {
                interface: self.interface.clone(),
                addr: self.addr,
                prefix_len: self.prefix_len,
                source,
            }),
        }
    }

    /// Remove the address if `add` installed it. A vanished address or
    /// interface counts as success.
    pub fn remove(&mut self) -> Result<(), GatewayError> {
        if !self.installed {
            return Ok(());
        }
        self.installed = false;
        match sys::remove_address(self.index, self.addr, self.prefix_len) {
            Ok(()) => {
                tracing::info!(interface = %self.interface, addr = %self.addr, "gateway address removed");
                Ok(())
            }
            Err(e) if matches!(e.raw_os_error(), Some(libc::EADDRNOTAVAIL) | Some(libc::ENODEV)) => {
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::Unsupported => Err(GatewayError::Unsupported),
            Err(source) => Err(GatewayError::Remove {
                interface: self.interface.clone(),
                addr: self.addr,
                prefix_len: self.prefix_len,
                source,
            }),
        }
    }
}

/// Whether IPv6 forwarding is on for `interface`. Advertising a prefix from
/// a non-forwarding node leaves hosts with a route that goes nowhere.
pub fn forwarding_enabled(interface: &str) -> io::Result<bool> {
    sys::forwarding_enabled(interface)
}

#[cfg(target_os = "linux")]
mod sys {
    use std::io;
    use std::net::Ipv6Addr;
    use std::os::fd::AsRawFd;

    use socket2::{Domain, Socket, Type};

    /// `struct in6_ifreq` from <linux/ipv6.h>.
    #[repr(C)]
    struct In6Ifreq {
        ifr6_addr: libc::in6_addr,
        ifr6_prefixlen: u32,
        ifr6_ifindex: libc::c_int,
    }

    fn ioctl_address(request: libc::c_ulong, index: u32, addr: Ipv6Addr, prefix_len: u8) -> io::Result<()> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, None)?;
        let ifindex = libc::c_int::try_from(index)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface index out of range"))?;
        let mut req = In6Ifreq {
            ifr6_addr: libc::in6_addr {
                s6_addr: addr.octets(),
            },
            ifr6_prefixlen: u32::from(prefix_len),
            ifr6_ifindex: ifindex,
        };
        let rc = unsafe { libc::ioctl(socket.as_raw_fd(), request as _, &mut req as *mut In6Ifreq) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn add_address(index: u32, addr: Ipv6Addr, prefix_len: u8) -> io::Result<()> {
        ioctl_address(libc::SIOCSIFADDR as libc::c_ulong, index, addr, prefix_len)
    }

    pub fn remove_address(index: u32, addr: Ipv6Addr, prefix_len: u8) -> io::Result<()> {
        ioctl_address(libc::SIOCDIFADDR as libc::c_ulong, index, addr, prefix_len)
    }

    pub fn forwarding_enabled(interface: &str) -> io::Result<bool> {
        let path = format!("/proc/sys/net/ipv6/conf/{interface}/forwarding");
        let value = std::fs::read_to_string(path)?;
        Ok(value.trim() == "1")
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::io;
    use std::net::Ipv6Addr;

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "gateway addresses need Linux")
    }

    pub fn add_address(_index: u32, _addr: Ipv6Addr, _prefix_len: u8) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn remove_address(_index: u32, _addr: Ipv6Addr, _prefix_len: u8) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn forwarding_enabled(_interface: &str) -> io::Result<bool> {
        Err(unsupported())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> GatewayIp {
        GatewayIp::new("lo", 1, "301:203:405:607::1".parse().unwrap(), 64)
    }

    #[test]
    fn remove_without_add_is_a_noop() {
        let mut gw = gateway();
        assert!(!gw.is_installed());
        assert!(gw.remove().is_ok());
        assert!(gw.remove().is_ok());
        assert!(!gw.is_installed());
    }

    #[test]
    fn accessors() {
        let gw = gateway();
        assert_eq!(gw.addr(), "301:203:405:607::1".parse::<Ipv6Addr>().unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn loopback_forwarding_is_readable() {
        // /proc may be absent in minimal sandboxes; only check the parse when it is there.
        if std::path::Path::new("/proc/sys/net/ipv6/conf/lo/forwarding").exists() {
            assert!(forwarding_enabled("lo").is_ok());
        }
    }

    #[test]
    fn missing_interface_forwarding_is_an_error() {
        assert!(forwarding_enabled("popura-no-such-if0").is_err());
    }
}
