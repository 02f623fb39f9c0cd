//! TCP forwarder: binds a proxy endpoint and forwards each accepted
//! connection to a fixed target, with back-pressure on both directions
//! (§4.16).

use std::net::SocketAddr;

use tokio::io::copy_bidirectional;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A running TCP forwarder.
pub struct TcpForwarder {
    proxy_address: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TcpForwarder {
    /// Bind `bind_address` and begin forwarding every accepted
    /// connection to `target`.
    pub async fn run(bind_address: SocketAddr, target: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(bind_address)
            .await
            .map_err(|e| Error::internal_with("failed to bind tcp proxy listener", e))?;
        let proxy_address = listener
            .local_addr()
            .map_err(|e| Error::internal_with("failed to read bound proxy address", e))?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let Ok((inbound, peer)) = accepted else { continue };
                        tokio::spawn(async move {
                            if let Err(err) = forward_one(inbound, target).await {
                                warn!(peer = %peer, error = %err, "tcp forward terminated");
                            }
                        });
                    }
                }
            }
        });

        Ok(Self {
            proxy_address,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    /// The address the proxy is actually listening on (useful when
    /// `bind_address` used port `0`).
    #[must_use]
    pub fn proxy_address(&self) -> SocketAddr {
        self.proxy_address
    }

    /// Stop accepting new connections. In-flight forwards run to
    /// completion.
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the accept loop to stop (after [`Self::close`]).
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

async fn forward_one(mut inbound: tokio::net::TcpStream, target: SocketAddr) -> Result<()> {
    let mut outbound = tokio::net::TcpStream::connect(target)
        .await
        .map_err(|e| Error::internal_with("failed to connect to forward target", e))?;
    debug!(target = %target, "tcp forward established");
    copy_bidirectional(&mut inbound, &mut outbound)
        .await
        .map_err(|e| Error::internal_with("tcp forward copy failed", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn forwards_bytes_in_both_directions() {
        let echo_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo_listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = echo_listener.accept().await {
                let mut buf = [0u8; 5];
                let _ = sock.read_exact(&mut buf).await;
                let _ = sock.write_all(&buf).await;
            }
        });

        let mut forwarder = TcpForwarder::run("127.0.0.1:0".parse().unwrap(), echo_addr)
            .await
            .unwrap();
        let proxy_addr = forwarder.proxy_address();

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut response = [0u8; 5];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(&response, b"hello");

        forwarder.close();
        forwarder.wait().await;
    }
}
