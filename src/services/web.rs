//! Control-plane HTTP server as a managed service.

use crate::services::Service;
use crate::state::AppState;
use crate::status::ServiceStatus;
use tokio::sync::oneshot;
use tracing::info;

pub struct WebService {
    port: u16,
    state: AppState,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl WebService {
    pub fn new(port: u16, state: AppState) -> Self {
        Self {
            port,
            state,
            shutdown_tx: None,
        }
    }
}

#[async_trait::async_trait]
impl Service for WebService {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        let router = crate::web::routes::router(self.state.clone());
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(port = self.port, "control plane listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);
        self.state.statuses.set("web", ServiceStatus::Active);

        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        server.await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.state.statuses.set("web", ServiceStatus::Disabled);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        Ok(())
    }
}
