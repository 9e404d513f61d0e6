use crate::{create_router, AppState};
use coderadar_core::CodeRadarConfig;
use coderadar_engine::Engine;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

pub struct Server {
    state: AppState,
    addr: SocketAddr,
}

impl Server {
    /// Wires the engine from configuration, registers configured
    /// repositories and resumes jobs interrupted by a previous shutdown.
    pub async fn new(addr: SocketAddr, config: CodeRadarConfig) -> anyhow::Result<Self> {
        let mut builder = Engine::builder(config.clone());
        if config.llm.enabled {
            match coderadar_ai::LlmInsightSynthesizer::from_config(&config.llm) {
                Ok(synthesizer) => builder = builder.synthesizer(Arc::new(synthesizer)),
                Err(e) => warn!("LLM synthesis disabled: {:#}", e),
            }
        } else {
            info!("LLM synthesis disabled; deep analyses will finish without insights");
        }
        let engine = builder.build()?;

        engine.register_repositories(&config.repositories).await?;
        let resumed = engine.orchestrator.reconcile_interrupted().await?;
        if resumed > 0 {
            info!("resumed {} interrupted analyses", resumed);
        }

        Ok(Self {
            state: AppState::new(engine),
            addr,
        })
    }

    pub fn from_state(addr: SocketAddr, state: AppState) -> Self {
        Self { state, addr }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let router = create_router(self.state);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        info!("CodeRadar API listening on http://{}", self.addr);
        info!("  POST /analyze/{{repository_id}} - Start an analysis");
        info!("  GET  /jobs/{{job_id}} - Poll a job");
        info!("  GET  /jobs/{{job_id}}/events - Server-sent job events");
        info!("  POST /cli/sync - Ingest an offline CLI bundle");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
