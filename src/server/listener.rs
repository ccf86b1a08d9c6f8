use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::info;

use crate::config::Config;
use crate::http::connection::Connection;
use crate::proxy::handler::ProxyHandler;

/// Accept loop handing each client connection to its own task.
pub struct Listener {
    inner: TcpListener,
    handler: Arc<ProxyHandler>,
}

impl Listener {
    pub async fn bind(addr: impl ToSocketAddrs, handler: ProxyHandler) -> anyhow::Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Self {
            inner,
            handler: Arc::new(handler),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("Listening on {}", self.local_addr()?);

        loop {
            let (socket, peer) = self.inner.accept().await?;
            tracing::debug!("Accepted connection from {}", peer);

            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
            }

            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                let mut conn = Connection::new(socket, handler);
                if let Err(e) = conn.run().await {
                    tracing::debug!("Connection error from {}: {}", peer, e);
                }
            });
        }
    }
}

/// Build the proxy from `cfg` and serve until the listener fails.
pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let handler = ProxyHandler::from_config(cfg)?;
    let listener = Listener::bind(&cfg.server.listen_addr, handler).await?;
    listener.run().await
}
