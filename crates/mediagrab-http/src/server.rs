//! HTTP server: TCP accept loop over the shared handler state.

use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CorsPolicy;
use crate::handlers::AppState;

/// The API server. Holds the fully wired handler state and serves
/// connections until the shutdown token fires.
pub struct HttpServer {
    state: Arc<AppState>,
}

impl HttpServer {
    pub fn new(state: Arc<AppState>) -> Self {
        if state.config.cors == CorsPolicy::Any {
            warn!("CORS_ORIGINS is '*'; any origin may call this API");
        }
        Self { state }
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.state.config.bind_address).await?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Serve on an already-bound listener (tests bind port 0).
    pub async fn run_with_listener(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> std::io::Result<()> {
        info!(
            "API server listening on {}",
            listener.local_addr().map_or_else(
                |_| self.state.config.bind_address.to_string(),
                |addr| addr.to_string()
            )
        );

        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = shutdown.cancelled() => break,
            };
            debug!("new connection from {peer_addr}");

            let state = Arc::clone(&self.state);
            let connection_shutdown = shutdown.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move {
                        Ok::<_, std::convert::Infallible>(state.handle(req, peer_addr.ip()).await)
                    }
                });

                let connection = http1::Builder::new().serve_connection(io, service);
                tokio::pin!(connection);
                let result = tokio::select! {
                    result = connection.as_mut() => result,
                    _ = connection_shutdown.cancelled() => {
                        connection.as_mut().graceful_shutdown();
                        connection.await
                    }
                };

                if let Err(err) = result {
                    let err_str = err.to_string();
                    // Client disconnects mid-response are routine.
                    if err_str.contains("connection closed before message completed") {
                        debug!("client disconnected: {err}");
                    } else {
                        error!("error serving connection: {err}");
                    }
                }
            });
        }

        info!("API server stopped");
        Ok(())
    }
}
