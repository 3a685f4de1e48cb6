//! Forward proxy support.
//!
//! When `ALL_PROXY` names a SOCKS5 proxy, catalog probes dial through it and
//! the chosen peer is handed to the engine as `socks://<proxy>/<host:port>`.
//! Only the no-authentication CONNECT subset of RFC 1928 is spoken.

use std::io;
use std::net::IpAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use super::catalog::endpoint;

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("malformed proxy url {0:?}: {1}")]
    Malformed(String, url::ParseError),

    #[error("unsupported proxy scheme {0:?}, expected socks5")]
    UnsupportedScheme(String),

    #[error("proxy url {0} has no host or port")]
    MissingEndpoint(Url),

    #[error("peer {0} cannot be routed through a proxy")]
    UnroutablePeer(Url),

    #[error("rewritten peer uri {0:?} is invalid")]
    InvalidRewrite(String),
}

/// A parsed SOCKS5 forward proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    url: Url,
    addr: String,
}

impl ProxyConfig {
    /// Read `ALL_PROXY`, falling back to `all_proxy`. Unset or empty → `None`.
    pub fn from_env() -> Result<Option<Self>, ProxyError> {
        let value = std::env::var("ALL_PROXY")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| std::env::var("all_proxy").ok());
        match value {
            Some(v) => Self::parse(&v),
            None => Ok(None),
        }
    }

    /// Parse a proxy URL. An empty string means no proxy.
    pub fn parse(value: &str) -> Result<Option<Self>, ProxyError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(None);
        }
        let url = Url::parse(value).map_err(|e| ProxyError::Malformed(value.to_string(), e))?;
        if !matches!(url.scheme(), "socks" | "socks5" | "socks5h") {
            return Err(ProxyError::UnsupportedScheme(url.scheme().to_string()));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProxyError::MissingEndpoint(url.clone()))?;
        let port = url.port().unwrap_or(1080);
        let addr = format!("{host}:{port}");
        Ok(Some(Self { url, addr }))
    }

    /// `host:port` of the proxy itself.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Rewrite `peer` so the engine reaches it through this proxy.
    ///
    /// The result is re-parsed; anything that does not come back as a
    /// `socks://` URI with a host and a target path is rejected.
    pub fn rewrite(&self, peer: &Url) -> Result<Url, ProxyError> {
        let target = endpoint(peer).ok_or_else(|| ProxyError::UnroutablePeer(peer.clone()))?;
        let raw = format!("socks://{}/{}", self.addr, target);
        let rewritten = Url::parse(&raw).map_err(|_| ProxyError::InvalidRewrite(raw.clone()))?;
        let valid = rewritten.scheme() == "socks"
            && rewritten.host_str().is_some()
            && rewritten.path().trim_start_matches('/') == target;
        if !valid {
            return Err(ProxyError::InvalidRewrite(raw));
        }
        Ok(rewritten)
    }

    /// Open a tunnelled TCP stream to `target` ("host:port") via the proxy.
    pub async fn connect(&self, target: &str) -> io::Result<TcpStream> {
        let (host, port) = split_target(target)?;
        let mut stream = TcpStream::connect(&self.addr).await?;

        stream
            .write_all(&[SOCKS_VERSION, 1, METHOD_NO_AUTH])
            .await?;
        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        if reply != [SOCKS_VERSION, METHOD_NO_AUTH] {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "proxy requires authentication",
            ));
        }

        let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00];
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => {
                request.push(ATYP_IPV4);
                request.extend_from_slice(&v4.octets());
            }
            Ok(IpAddr::V6(v6)) => {
                request.push(ATYP_IPV6);
                request.extend_from_slice(&v6.octets());
            }
            Err(_) => {
                let name = host.as_bytes();
                let len = u8::try_from(name.len()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "host name too long")
                })?;
                request.push(ATYP_DOMAIN);
                request.push(len);
                request.extend_from_slice(name);
            }
        }
        request.extend_from_slice(&port.to_be_bytes());
        stream.write_all(&request).await?;

        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await?;
        if head[0] != SOCKS_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "proxy replied with wrong version",
            ));
        }
        if head[1] != 0x00 {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("proxy CONNECT failed with code {}", head[1]),
            ));
        }
        // Drain the bound address.
        let addr_len = match head[3] {
            ATYP_IPV4 => 4,
            ATYP_IPV6 => 16,
            ATYP_DOMAIN => stream.read_u8().await? as usize,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown address type {other}"),
                ))
            }
        };
        let mut bound = vec![0u8; addr_len + 2];
        stream.read_exact(&mut bound).await?;

        Ok(stream)
    }
}

fn split_target(target: &str) -> io::Result<(&str, u16)> {
    let invalid = || io::Error::new(io::ErrorKind::InvalidInput, format!("bad target {target}"));
    let (host, port) = target.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse().map_err(|_| invalid())?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host, port))
}
