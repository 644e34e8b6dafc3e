//! MCP server implementation.
//!
//! Provides both stdio (single-client, line-delimited) and HTTP streaming
//! transports over one dispatcher. The lifecycle owns every registry:
//! construction happens once here and references flow downward, never
//! through globals.

pub mod dispatch;
pub mod http;
pub mod progress;
pub mod security;
pub mod session;
pub mod stdio;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::DbProvisioner;
use crate::tools;
use self::dispatch::Dispatcher;
use self::session::SessionRegistry;

/// Failure phase, used by the binary to pick its exit code: startup
/// failures exit 1, runtime failures exit 2.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("startup failed: {0}")]
    Startup(anyhow::Error),
    #[error("runtime failure: {0}")]
    Runtime(anyhow::Error),
}

/// The assembled server.
pub struct McpServer {
    config: Config,
    registry: Arc<SessionRegistry>,
    provisioner: Arc<DbProvisioner>,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    started: Instant,
}

impl McpServer {
    /// Construct the server: session registry, database provisioner, tool
    /// registry, dispatcher, in that order.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let shutdown = CancellationToken::new();
        let registry = Arc::new(SessionRegistry::new(
            config.session_idle_timeout,
            shutdown.child_token(),
        ));
        let provisioner = Arc::new(DbProvisioner::new(&config));
        let tool_registry = Arc::new(tools::register_all_tools());
        tracing::info!(tools = tool_registry.len(), "tools registered");
        let dispatcher = Arc::new(Dispatcher::new(
            config.clone(),
            tool_registry,
            Arc::clone(&provisioner),
        ));

        Self {
            config,
            registry,
            provisioner,
            dispatcher,
            shutdown,
            started: Instant::now(),
        }
    }

    /// Cancellation token observed by every session and request.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run in stdio mode until stdin closes or a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Runtime`] on transport I/O failure.
    pub async fn run_stdio(self) -> Result<(), ServeError> {
        tracing::info!("starting MCP server in stdio mode");
        let _sweep = self.registry.start_sweep_task(self.config.sweep_interval);

        let signal_token = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                signal_token.cancel();
            }
        });

        let result = stdio::run_stdio(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.registry),
            self.shutdown.clone(),
        )
        .await;

        self.drain().await;
        result.map_err(ServeError::Runtime)
    }

    /// Run in HTTP mode until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Startup`] when the port cannot be bound and
    /// [`ServeError::Runtime`] when the serve loop fails.
    pub async fn run_http(self) -> Result<(), ServeError> {
        tracing::info!(port = self.config.port, "starting MCP server in HTTP mode");
        let _sweep = self.registry.start_sweep_task(self.config.sweep_interval);

        let state = Arc::new(http::AppState {
            config: self.config.clone(),
            registry: Arc::clone(&self.registry),
            dispatcher: Arc::clone(&self.dispatcher),
            started: self.started,
        });
        let router = http::create_router(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServeError::Startup(e.into()))?;
        match listener.local_addr() {
            Ok(local) => tracing::info!(addr = %local, "HTTP server listening"),
            Err(e) => return Err(ServeError::Startup(e.into())),
        }

        let shutdown = self.shutdown.clone();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutdown signal received");
                    }
                    () = shutdown.cancelled() => {}
                }
            })
            .await;

        self.drain().await;
        served.map_err(|e| ServeError::Runtime(e.into()))
    }

    /// Shutdown sequence: stop admissions, cancel in-flight work, wait up
    /// to the grace period, then release sessions and database handles.
    async fn drain(&self) {
        tracing::info!("draining server");
        self.shutdown.cancel();

        let deadline = Instant::now() + self.config.shutdown_grace;
        loop {
            let in_flight = self.registry.in_flight_total().await;
            if in_flight == 0 || Instant::now() >= deadline {
                if in_flight > 0 {
                    tracing::warn!(in_flight, "grace period expired with requests in flight");
                }
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }

        self.registry.terminate_all().await;
        self.provisioner.close_all().await;
        tracing::info!("server drained");
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("port", &self.config.port)
            .finish()
    }
}
