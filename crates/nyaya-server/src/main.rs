mod logging;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto::Builder,
    service::TowerToHyperService,
};
use nyaya_agent::{ClaudeEngine, OllamaEngine};
use nyaya_core::{
    config::{Config, EngineBackend},
    ResearchEngine, ResponseStreamer, RunLimits,
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::routes::AppState;

// ── main ──────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    logging::init(config.log_format);

    let engine = build_engine(&config);
    info!(
        backend = %config.backend,
        engine = engine.name(),
        "research engine ready"
    );

    let state = Arc::new(AppState {
        streamer: ResponseStreamer::new(engine, RunLimits::default()),
    });
    let app = routes::router(state);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(keep_alive_s = config.keep_alive.as_secs(), "Listening on {addr}");
    serve(listener, app, config.keep_alive).await;

    Ok(())
}

fn build_engine(config: &Config) -> Arc<dyn ResearchEngine> {
    match config.backend {
        EngineBackend::Claude => Arc::new(ClaudeEngine::new(
            config.claude_bin.clone(),
            config.model.clone(),
            config.claude_workdir.clone(),
        )),
        EngineBackend::Ollama => Arc::new(OllamaEngine::new(
            config.ollama_url.clone(),
            config.ollama_model.clone(),
        )),
    }
}

/// Accept loop with an explicit idle bound: a connection may sit between
/// requests for up to `keep_alive` before it is closed.
async fn serve(listener: TcpListener, app: Router, keep_alive: Duration) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let mut builder = Builder::new(TokioExecutor::new());
            builder
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(keep_alive)
                .keep_alive(true);
            if let Err(e) = builder.serve_connection(TokioIo::new(stream), service).await {
                debug!(%peer, "connection closed: {e}");
            }
        });
    }
}
