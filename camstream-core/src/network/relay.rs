//! Envelope relay server.
//!
//! Every WebSocket connection registers under the id taken from its URL
//! path (`ws://host:port/<id>`). Each inbound text message that parses as
//! an [`Envelope`] is forwarded verbatim to the connection registered
//! under its `receiver`. Unparseable messages and messages for absent
//! receivers are dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::network::envelope::Envelope;

/// Messages queued per connection before forwarding waits.
const PEER_BUFFER: usize = 32;

#[derive(Debug)]
struct Route {
    conn_id: u64,
    tx: mpsc::Sender<String>,
}

/// Connected peers keyed by id.
#[derive(Debug, Default)]
struct Registry {
    routes: Mutex<HashMap<String, Route>>,
}

impl Registry {
    fn register(&self, peer_id: &str, conn_id: u64, tx: mpsc::Sender<String>) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        if routes.insert(peer_id.to_string(), Route { conn_id, tx }).is_some() {
            info!(peer_id, "replaced existing connection");
        }
    }

    /// Remove `peer_id` only if it still points at `conn_id`.
    fn unregister(&self, peer_id: &str, conn_id: u64) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        if routes.get(peer_id).is_some_and(|r| r.conn_id == conn_id) {
            routes.remove(peer_id);
        }
    }

    fn route(&self, peer_id: &str) -> Option<mpsc::Sender<String>> {
        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.get(peer_id).map(|r| r.tx.clone())
    }

    fn len(&self) -> usize {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

// ── RelayServer ──────────────────────────────────────────────────

/// Point-to-point envelope router.
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    next_conn_id: AtomicU64,
}

impl RelayServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, StreamError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            registry: Arc::new(Registry::default()),
            next_conn_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, StreamError> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of currently registered peers.
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Accept and serve connections until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), StreamError> {
        info!("relay listening on {}", self.local_addr()?);
        let mut connections = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                result = self.listener.accept() => result,
                _ = shutdown.cancelled() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
            connections.spawn(serve_connection(
                stream,
                peer,
                conn_id,
                Arc::clone(&self.registry),
            ));
        }

        connections.shutdown().await;
        info!("relay stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    conn_id: u64,
    registry: Arc<Registry>,
) {
    let mut path = String::new();
    let ws = accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            path = req.uri().path().to_string();
            Ok(resp)
        },
    )
    .await;

    let ws = match ws {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, "handshake failed: {e}");
            return;
        }
    };

    let peer_id = path.trim_matches('/').to_string();
    if peer_id.is_empty() {
        warn!(%peer, "connection without a peer id in its path; dropping");
        return;
    }

    let (tx, mut rx) = mpsc::channel::<String>(PEER_BUFFER);
    registry.register(&peer_id, conn_id, tx);
    info!(%peer, peer_id = %peer_id, "peer connected");

    let (mut sink, mut stream) = ws.split();
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!("forward write failed: {e}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(peer_id = %peer_id, "read error: {e}");
                break;
            }
        };

        let receiver = match Envelope::from_json(&text) {
            Ok(envelope) => envelope.receiver().to_string(),
            Err(e) => {
                debug!(peer_id = %peer_id, "dropping unparseable message: {e}");
                continue;
            }
        };

        match registry.route(&receiver) {
            Some(route) => {
                debug!(from = %peer_id, to = %receiver, "forwarding {} bytes", text.len());
                if route.send(text).await.is_err() {
                    debug!(%receiver, "receiver went away while forwarding");
                }
            }
            None => debug!(%receiver, "receiver not connected; dropping message"),
        }
    }

    registry.unregister(&peer_id, conn_id);
    writer.abort();
    info!(peer_id = %peer_id, "peer disconnected");
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    async fn start_relay() -> (SocketAddr, CancellationToken, Arc<Registry>) {
        let relay = RelayServer::bind("127.0.0.1:0").await.unwrap();
        let addr = relay.local_addr().unwrap();
        let registry = Arc::clone(&relay.registry);
        let token = CancellationToken::new();
        tokio::spawn(relay.run(token.clone()));
        (addr, token, registry)
    }

    async fn wait_registered(registry: &Registry, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("peers never registered");
    }

    #[tokio::test]
    async fn routes_by_receiver() {
        let (addr, token, registry) = start_relay().await;

        let (mut client, _) = connect_async(format!("ws://{addr}/user-client")).await.unwrap();
        let (mut analyzer, _) = connect_async(format!("ws://{addr}/app-analyzer")).await.unwrap();
        wait_registered(&registry, 2).await;

        // Unparseable and unroutable messages are dropped.
        client.send(Message::Text("garbage".into())).await.unwrap();
        let nowhere = Envelope::new("user-client", "nobody", "x").to_json().unwrap();
        client.send(Message::Text(nowhere)).await.unwrap();

        let frame = Envelope::new("user-client", "app-analyzer", "QUJD").to_json().unwrap();
        client.send(Message::Text(frame.clone())).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), analyzer.next())
            .await
            .expect("timeout")
            .unwrap()
            .unwrap();
        assert_eq!(received, Message::Text(frame));

        let reply = Envelope::new("app-analyzer", "user-client", "RESULT").to_json().unwrap();
        analyzer.send(Message::Text(reply.clone())).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timeout")
            .unwrap()
            .unwrap();
        assert_eq!(received, Message::Text(reply));

        token.cancel();
    }

    #[tokio::test]
    async fn disconnect_unregisters() {
        let (addr, token, registry) = start_relay().await;

        let (mut client, _) = connect_async(format!("ws://{addr}/user-client")).await.unwrap();
        wait_registered(&registry, 1).await;

        client.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.len() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("peer never unregistered");

        token.cancel();
    }

    #[test]
    fn stale_connection_does_not_unregister_replacement() {
        let registry = Registry::default();
        let (old_tx, _old_rx) = mpsc::channel(1);
        let (new_tx, _new_rx) = mpsc::channel(1);

        registry.register("user-client", 1, old_tx);
        registry.register("user-client", 2, new_tx);
        registry.unregister("user-client", 1);

        assert!(registry.route("user-client").is_some());
        registry.unregister("user-client", 2);
        assert!(registry.route("user-client").is_none());
    }
}
