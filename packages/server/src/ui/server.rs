//! Server execution logic.

use std::{future::Future, sync::Arc};

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::usecase::ProcessContext;

use super::{
    handler::{create_room, health_check, join_room, leave_room, rejoin_room, websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

/// Room synchronizer HTTP / WebSocket server
///
/// # Example
///
/// ```ignore
/// let context = ProcessContext::new(store, clock, SyncConfig::default(), InstanceId::generate());
/// Server::new(context).run("127.0.0.1".to_string(), 8080).await?;
/// ```
pub struct Server {
    context: Arc<ProcessContext>,
}

impl Server {
    pub fn new(context: Arc<ProcessContext>) -> Self {
        Self { context }
    }

    /// Build the router with every endpoint mounted.
    pub fn router(&self) -> Router {
        let app_state = Arc::new(AppState::new(self.context.clone()));

        Router::new()
            // WebSocket エンドポイント
            .route("/ws/{room_id}", get(websocket_handler))
            // HTTP エンドポイント
            .route("/api/health", get(health_check))
            .route("/api/rooms", post(create_room))
            .route("/api/rooms/{room_id}/join", post(join_room))
            .route("/api/rooms/{room_id}/leave", post(leave_room))
            .route("/api/rooms/{room_id}/rejoin", post(rejoin_room))
            .layer(TraceLayer::new_for_http())
            .with_state(app_state)
    }

    /// Run the server until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the specified address or
    /// if there's an error during server execution.
    pub async fn run(self, host: String, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        let bind_addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&bind_addr).await?;

        tracing::info!("Zashiki server listening on {}", listener.local_addr()?);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        self.serve(listener, shutdown_signal()).await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
