//! UDP forwarder: a single proxy socket demultiplexes client datagrams
//! into per-client upstream sockets, tracked in a bounded LRU flow cache
//! (§4.16).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::lru::LruCache;

struct Flow {
    upstream: Arc<UdpSocket>,
}

/// A running UDP forwarder.
pub struct UdpForwarder {
    proxy_address: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl UdpForwarder {
    /// Bind `bind_address` and forward datagrams to `target`, maintaining
    /// at most `max_flows` concurrent client flows.
    pub async fn run(bind_address: SocketAddr, target: SocketAddr, max_flows: usize) -> Result<Self> {
        let proxy_socket = Arc::new(
            UdpSocket::bind(bind_address)
                .await
                .map_err(|e| Error::internal_with("failed to bind udp proxy socket", e))?,
        );
        let proxy_address = proxy_socket
            .local_addr()
            .map_err(|e| Error::internal_with("failed to read bound proxy address", e))?;

        let flows: Arc<Mutex<LruCache<SocketAddr, Flow>>> =
            Arc::new(Mutex::new(LruCache::new(max_flows)));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let task = {
            let proxy_socket = proxy_socket.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        recvd = proxy_socket.recv_from(&mut buf) => {
                            let Ok((n, client)) = recvd else { continue };
                            if let Err(err) = handle_datagram(
                                &proxy_socket,
                                &flows,
                                client,
                                target,
                                &buf[..n],
                            )
                            .await
                            {
                                warn!(client = %client, error = %err, "udp forward failed");
                            }
                        }
                    }
                }
            })
        };

        Ok(Self {
            proxy_address,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    /// The bound proxy address.
    #[must_use]
    pub fn proxy_address(&self) -> SocketAddr {
        self.proxy_address
    }

    /// Stop the forwarding loop.
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the forwarding loop to stop.
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

async fn handle_datagram(
    proxy_socket: &Arc<UdpSocket>,
    flows: &Arc<Mutex<LruCache<SocketAddr, Flow>>>,
    client: SocketAddr,
    target: SocketAddr,
    payload: &[u8],
) -> Result<()> {
    let mut flows_guard = flows.lock().await;
    let upstream = if let Some(flow) = flows_guard.get(&client) {
        flow.upstream.clone()
    } else {
        let socket = Arc::new(
            UdpSocket::bind("0.0.0.0:0")
                .await
                .map_err(|e| Error::internal_with("failed to open upstream udp socket", e))?,
        );
        socket
            .connect(target)
            .await
            .map_err(|e| Error::internal_with("failed to connect upstream udp socket", e))?;

        spawn_upstream_reader(socket.clone(), proxy_socket.clone(), client);

        if let Some((evicted_client, evicted_flow)) =
            flows_guard.insert(client, Flow { upstream: socket.clone() })
        {
            debug!(client = %evicted_client, "evicting least-recently-used udp flow");
            drop(evicted_flow);
        }
        socket
    };
    drop(flows_guard);

    upstream
        .send(payload)
        .await
        .map_err(|e| Error::internal_with("failed to forward datagram upstream", e))?;
    Ok(())
}

fn spawn_upstream_reader(upstream: Arc<UdpSocket>, proxy_socket: Arc<UdpSocket>, client: SocketAddr) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match upstream.recv(&mut buf).await {
                Ok(n) => {
                    if proxy_socket.send_to(&buf[..n], client).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket as TokioUdp;

    #[tokio::test]
    async fn forwards_datagram_round_trip() {
        let echo_socket = TokioUdp::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo_socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            if let Ok((n, from)) = echo_socket.recv_from(&mut buf).await {
                let _ = echo_socket.send_to(&buf[..n], from).await;
            }
        });

        let mut forwarder = UdpForwarder::run("127.0.0.1:0".parse().unwrap(), echo_addr, 8)
            .await
            .unwrap();
        let proxy_addr = forwarder.proxy_address();

        let client = TokioUdp::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"ping", proxy_addr).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(std::time::Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"ping");

        forwarder.close();
        forwarder.wait().await;
    }
}
