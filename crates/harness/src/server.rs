//! Loopback HTTP servers the harness can point a run at.

use axum::http::StatusCode;
use axum::Router;
use headless_test_core::{Error, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};
use url::Url;

pub struct HttpServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl HttpServer {
    /// Serve `app` on an ephemeral port on 127.0.0.1.
    pub async fn spawn(app: Router) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| Error::Server(format!("bind failed: {}", e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Server(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                warn!("HTTP server stopped with error: {}", e);
            }
        });

        debug!(%addr, "HTTP server listening");
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            join: Some(join),
        })
    }

    /// Answers every request with 404. Used when the caller supplies no server.
    pub async fn noop() -> Result<Self> {
        Self::spawn(Router::new().fallback(|| async { StatusCode::NOT_FOUND })).await
    }

    /// Static files from `root`.
    pub async fn static_dir(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::Server(format!(
                "not a directory: {}",
                root.display()
            )));
        }
        info!(root = %root.display(), "Serving static files");
        Self::spawn(Router::new().fallback_service(ServeDir::new(root))).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> Result<Url> {
        Ok(Url::parse(&format!("http://{}/", self.addr))?)
    }

    /// Stop accepting connections and wait for the serve task to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            join.await
                .map_err(|e| Error::Server(format!("server task failed: {}", e)))?;
        }
        debug!(addr = %self.addr, "HTTP server stopped");
        Ok(())
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
