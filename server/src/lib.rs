//! Broker server — exposes registered modules over a WebSocket.
//!
//! ARCHITECTURE
//! ============
//! - [`registry`]: module name → handler, method name → async closure.
//! - [`invoker`]: resolves a request against the registry and runs it.
//! - [`routes::ws`]: connection endpoint; decodes frames, spawns dispatch,
//!   writes responses back through a per-connection channel.
//! - [`state`]: registry + live connection set shared by every handler.
//!
//! Modules are registered on a [`BrokerServer`] before `listen()`; the
//! registry is frozen once the server starts accepting connections.

pub mod config;
pub mod invoker;
pub mod registry;
pub mod routes;
pub mod state;

use tokio::net::TcpListener;
use tracing::info;

pub use config::ServerConfig;
pub use invoker::DispatchError;
pub use registry::{Handler, Method, MethodError, MethodTable, ModuleRecord, ModuleRegistry};
pub use state::{AppState, ConnectionId};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server failed: {0}")]
    Serve(#[from] std::io::Error),
}

/// A broker under construction: register modules, then listen.
pub struct BrokerServer {
    config: ServerConfig,
    registry: ModuleRegistry,
}

impl BrokerServer {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self { config, registry: ModuleRegistry::new() }
    }

    /// Expose `handler` to clients under `name`.
    pub fn register_module(&mut self, name: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        self.registry.register(name, handler);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Bind the configured address and serve until the process stops.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound and
    /// [`ServerError::Serve`] if the accept loop fails.
    pub async fn listen(self) -> Result<(), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Serve`] if the accept loop fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr()?;
        let modules = self.registry.module_names();
        let state = AppState::new(self.registry, self.config.outbound_capacity);
        let app = routes::app(state);

        info!(addr = %local, ?modules, "broker listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}
