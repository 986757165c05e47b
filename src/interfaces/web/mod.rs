pub(crate) mod auth;
mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::core::lifecycle::LifecycleComponent;
use crate::core::pipeline::trigger::TriggerAdapter;
use crate::core::store::ContentStore;

/// HTTP surface for triggers, dead-letter operations and queue stats.
pub struct ApiServer {
    store: ContentStore,
    trigger: TriggerAdapter,
    secret: Arc<String>,
    api_host: String,
    api_port: u16,
    shutdown: CancellationToken,
}

pub struct ApiServerConfig {
    pub store: ContentStore,
    pub trigger: TriggerAdapter,
    pub secret: String,
    pub api_host: String,
    pub api_port: u16,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: ContentStore,
    pub(crate) trigger: TriggerAdapter,
    pub(crate) secret: Arc<String>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            store: config.store,
            trigger: config.trigger,
            secret: Arc::new(config.secret),
            api_host: config.api_host,
            api_port: config.api_port,
            shutdown: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.api_host, self.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding API server to {}", addr))?;

        let state = AppState {
            store: self.store.clone(),
            trigger: self.trigger.clone(),
            secret: self.secret.clone(),
        };
        let app = router::build_api_router(state);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            info!("API Server running at http://{addr}");
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                error!("API Server crashed: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        self.shutdown.cancel();
        Ok(())
    }
}
