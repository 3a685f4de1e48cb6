//! Embedded public peer catalog.
//!
//! The list is compiled into the binary and parsed once, on first use. A
//! malformed entry is a packaging defect and aborts at that point.

use std::sync::OnceLock;

use url::Url;

const PEERS_TXT: &str = include_str!("../../peers.txt");

static PUBLIC_PEERS: OnceLock<Vec<Url>> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
#[error("line {line}: {uri:?}: {source}")]
pub struct CatalogError {
    pub line: usize,
    pub uri: String,
    #[source]
    pub source: url::ParseError,
}

/// Parse a newline separated list of peer URIs. Blank lines and lines
/// starting with `#` are skipped.
pub fn parse_catalog(text: &str) -> Result<Vec<Url>, CatalogError> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
        .map(|(line, l)| {
            Url::parse(l).map_err(|source| CatalogError {
                line,
                uri: l.to_string(),
                source,
            })
        })
        .collect()
}

/// Every peer in the embedded catalog.
pub fn public_peers() -> &'static [Url] {
    PUBLIC_PEERS.get_or_init(|| {
        parse_catalog(PEERS_TXT)
            .unwrap_or_else(|e| panic!("embedded peer catalog is malformed: {e}"))
    })
}

/// Catalog peers reachable through a SOCKS proxy: plain TCP only.
pub fn tcp_peers() -> Vec<Url> {
    public_peers()
        .iter()
        .filter(|u| u.scheme() == "tcp")
        .cloned()
        .collect()
}

/// `host:port` of a peer URI, brackets kept for IPv6 literals.
pub fn endpoint(uri: &Url) -> Option<String> {
    let host = uri.host_str().filter(|h| !h.is_empty())?;
    let port = uri.port()?;
    Some(format!("{host}:{port}"))
}
