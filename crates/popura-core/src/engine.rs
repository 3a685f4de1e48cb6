//! The network engine seam.
//!
//! Popura modules never route traffic or own peer sessions. They read the
//! peer table from, and ask for new connections through, whatever engine the
//! host process wires in.

use std::time::Duration;

use futures::future::BoxFuture;
use url::Url;

/// One entry of the engine's peer table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Remote endpoint as the engine reports it, e.g. "tcp://[fe80::1%eth0]:4000".
    pub remote: String,
    pub public_key: Option<[u8; 32]>,
    pub uptime: Duration,
}

impl PeerInfo {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            public_key: None,
            uptime: Duration::ZERO,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unsupported peer scheme: {0}")]
    UnsupportedScheme(String),

    #[error("peer uri has no host or port: {0}")]
    MissingEndpoint(Url),

    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("dial {uri} failed: {source}")]
    Dial {
        uri: Url,
        #[source]
        source: std::io::Error,
    },

    #[error("engine rejected peer: {0}")]
    Rejected(String),
}

/// What the modules need from the routing engine.
pub trait NetworkEngine: Send + Sync {
    /// The node's ed25519 public key; the routed subnet is derived from it.
    fn public_key(&self) -> [u8; 32];

    /// Snapshot of currently connected peers.
    fn peers(&self) -> Vec<PeerInfo>;

    /// Ask the engine to connect to `uri`. Resolves once the link is up or
    /// the attempt has failed.
    fn call_peer(&self, uri: Url) -> BoxFuture<'_, Result<(), EngineError>>;
}
