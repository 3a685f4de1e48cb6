//! Link table: the daemon's stand-in network engine.
//!
//! Holds one TCP transport link per peer URI. A link stays in the table
//! until the remote closes it. Overlay routing and session crypto live in
//! the routing engine proper, which this table does not attempt to be.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use url::Url;

use popura_core::{EngineError, NetworkEngine, PeerInfo};
use popura_services::autopeer::proxy::ProxyConfig;

struct Link {
    id: u64,
    remote: String,
    connected_at: Instant,
    reader: tokio::task::AbortHandle,
}

pub struct LinkTable {
    public_key: [u8; 32],
    links: Arc<DashMap<String, Link>>,
    next_id: AtomicU64,
}

impl LinkTable {
    pub fn new(public_key: [u8; 32]) -> Self {
        Self {
            public_key,
            links: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    async fn dial(uri: &Url) -> Result<TcpStream, EngineError> {
        let endpoint = || {
            let host = uri.host_str().filter(|h| !h.is_empty())?;
            let port = uri.port()?;
            Some(format!("{host}:{port}"))
        };
        let dial_error = |source| EngineError::Dial {
            uri: uri.clone(),
            source,
        };

        match uri.scheme() {
            // Both carry the mesh protocol over plain TCP at this layer.
            "tcp" | "tls" => {
                let target = endpoint().ok_or_else(|| EngineError::MissingEndpoint(uri.clone()))?;
                TcpStream::connect(&target).await.map_err(dial_error)
            }
            // socks://<proxy host:port>/<peer host:port>
            "socks" => {
                let proxy_addr =
                    endpoint().ok_or_else(|| EngineError::MissingEndpoint(uri.clone()))?;
                let target = uri.path().trim_start_matches('/');
                if target.is_empty() {
                    return Err(EngineError::MissingEndpoint(uri.clone()));
                }
                let proxy = ProxyConfig::parse(&format!("socks5://{proxy_addr}"))
                    .map_err(|e| EngineError::Rejected(e.to_string()))?
                    .ok_or_else(|| EngineError::MissingEndpoint(uri.clone()))?;
                proxy.connect(target).await.map_err(dial_error)
            }
            other => Err(EngineError::UnsupportedScheme(other.to_string())),
        }
    }

    async fn connect(&self, uri: Url) -> Result<(), EngineError> {
        let key = uri.to_string();
        if self.links.contains_key(&key) {
            return Err(EngineError::AlreadyConnected(key));
        }

        let mut stream = Self::dial(&uri).await?;
        let remote = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| key.clone());

        match self.links.entry(key.clone()) {
            Entry::Occupied(_) => Err(EngineError::AlreadyConnected(key)),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let links = self.links.clone();
                let watch_key = key.clone();
                let reader = tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }
                    links.remove_if(&watch_key, |_, link| link.id == id);
                    tracing::info!(peer = %watch_key, "link closed");
                });
                slot.insert(Link {
                    id,
                    remote: format!("tcp://{remote}"),
                    connected_at: Instant::now(),
                    reader: reader.abort_handle(),
                });
                tracing::info!(peer = %key, remote = %remote, "link up");
                Ok(())
            }
        }
    }

    /// Drop every link.
    pub fn close_all(&self) {
        self.links.retain(|_, link| {
            link.reader.abort();
            false
        });
    }
}

impl NetworkEngine for LinkTable {
    fn public_key(&self) -> [u8; 32] {
        self.public_key
    }

    fn peers(&self) -> Vec<PeerInfo> {
        self.links
            .iter()
            .map(|e| PeerInfo {
                remote: e.value().remote.clone(),
                public_key: None,
                uptime: e.value().connected_at.elapsed(),
            })
            .collect()
    }

    fn call_peer(&self, uri: Url) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(self.connect(uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, Url) {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = l.local_addr().unwrap().port();
        (l, Url::parse(&format!("tcp://127.0.0.1:{port}")).unwrap())
    }

    #[tokio::test]
    async fn link_is_listed_until_remote_closes() {
        let (l, uri) = listener().await;
        let table = LinkTable::new([1; 32]);

        table.call_peer(uri.clone()).await.unwrap();
        let (accepted, _) = l.accept().await.unwrap();

        let peers = table.peers();
        assert_eq!(peers.len(), 1);
        assert!(peers[0].remote.starts_with("tcp://127.0.0.1:"));

        drop(accepted);
        for _ in 0..50 {
            if table.len() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn second_call_to_same_peer_is_rejected() {
        let (_l, uri) = listener().await;
        let table = LinkTable::new([1; 32]);
        table.call_peer(uri.clone()).await.unwrap();
        assert!(matches!(
            table.call_peer(uri).await,
            Err(EngineError::AlreadyConnected(_))
        ));
        table.close_all();
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn unsupported_and_incomplete_uris_fail() {
        let table = LinkTable::new([1; 32]);
        assert!(matches!(
            table.call_peer(Url::parse("quic://127.0.0.1:1").unwrap()).await,
            Err(EngineError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            table.call_peer(Url::parse("tcp://127.0.0.1").unwrap()).await,
            Err(EngineError::MissingEndpoint(_))
        ));
        assert!(matches!(
            table.call_peer(Url::parse("socks://127.0.0.1:9050").unwrap()).await,
            Err(EngineError::MissingEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn refused_dial_is_reported() {
        let (l, uri) = listener().await;
        drop(l);
        let table = LinkTable::new([1; 32]);
        assert!(matches!(
            table.call_peer(uri).await,
            Err(EngineError::Dial { .. })
        ));
        assert!(table.peers().is_empty());
    }
}
