//! Network module with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown future resolves.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::config::NetworkConfig;
use super::handlers::{
    classify_async_handler, classify_handler, events_handler, health_handler, liveness_handler,
    observe_handler, readiness_handler, AppState,
};
use super::middleware::{with_common_layers, with_request_timeout};
use super::shutdown::ShutdownController;
use crate::service::ClassificationService;

/// Manages the HTTP server lifecycle around a running
/// [`ClassificationService`].
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    service: Arc<ClassificationService>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, service: Arc<ClassificationService>) -> Self {
        Self {
            config,
            listener: None,
            shutdown: Arc::new(ShutdownController::new(Arc::clone(&service))),
            service,
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health`, `/health/live`, `/health/ready`
    /// - `POST /api/v1/classify` -- classify and wait
    /// - `POST /api/v1/classify/async` -- classify in the background
    /// - `GET /api/v1/classify/{token}` -- wait on an in-flight call
    /// - `GET /api/v1/events` -- SSE feed of completed classifications
    ///
    /// The request timeout covers the classify routes only.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            service: Arc::clone(&self.service),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        };

        let classify = Router::new()
            .route("/api/v1/classify", post(classify_handler))
            .route("/api/v1/classify/async", post(classify_async_handler))
            .route("/api/v1/classify/{token}", get(observe_handler));

        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/api/v1/events", get(events_handler))
            .merge(with_request_timeout(classify, &self.config));

        with_common_layers(router, &self.config).with_state(state)
    }

    /// Binds the TCP listener and returns the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves requests until `signal` resolves, then runs
    /// [`ShutdownController::shutdown`] with the configured drain timeout
    /// before axum finishes the remaining connections.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();

        let controller = Arc::clone(&self.shutdown);
        let drain_timeout = self.config.drain_timeout;

        self.shutdown.set_ready();
        info!("serving HTTP");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                signal.await;
                controller.shutdown(drain_timeout).await;
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}
