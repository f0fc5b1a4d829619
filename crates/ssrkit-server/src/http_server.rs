//! HTTP server for the rendering service
//!
//! Listens on a TCP socket, spawns one tokio task per connection and hands
//! every request to the [`SsrRouter`]. Connections are served with hyper's
//! HTTP/1.1 implementation.
//!
//! # Example
//!
//! ```no_run
//! use ssrkit_server::{App, HttpServer};
//! use ssrkit_common::SsrConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = App::new(SsrConfig::default()).unwrap();
//!     let server = HttpServer::new(app.router());
//!     server.run("127.0.0.1:3000".parse().unwrap()).await.unwrap();
//! }
//! ```

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use ssrkit_common::{Result, SsrError};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::http_router::SsrRouter;
use crate::runtime::EngineFactory;

/// HTTP server for the rendering service.
pub struct HttpServer<F: EngineFactory> {
    router: Arc<SsrRouter<F>>,
}

impl<F: EngineFactory> HttpServer<F> {
    pub fn new(router: Arc<SsrRouter<F>>) -> Self {
        Self { router }
    }

    /// Binds `addr` and serves until the accept loop fails.
    ///
    /// # Arguments
    ///
    /// * `addr` - The socket address to bind to
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SsrError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        tracing::info!(
            "HTTP server listening on {}",
            listener
                .local_addr()
                .map_err(|e| SsrError::Transport(format!("Failed to get local address: {}", e)))?
        );

        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| SsrError::Transport(format!("Failed to accept connection: {}", e)))?;

            let io = TokioIo::new(stream);
            let router = self.router.clone();

            tokio::task::spawn(async move {
                let metrics = router.metrics().clone();
                metrics.connection_opened();

                let service = service_fn(move |req: Request<Incoming>| {
                    let router = router.clone();
                    async move { Ok::<_, Infallible>(router.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::debug!("Error serving connection from {}: {}", peer, err);
                }
                metrics.connection_closed();
            });
        }
    }
}
