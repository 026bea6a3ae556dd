mod routes;
mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use copydesk_core::config::{RetrievalKind, ServiceCfg};
use copydesk_core::corpus::CorpusHandle;
use copydesk_core::retrieval::{HostedIndex, LocalScan, RemoteScan, Retriever};
use copydesk_core::suggest::SuggestionPipeline;
use copydesk_llm::http;
use copydesk_llm::provider::{EmbeddingProvider, LlmProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::shutdown::ShutdownGuard;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // JSON logs to stdout; RUST_LOG overrides the default `info` filter.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_target(true))
        .init();

    let cfg = Arc::new(ServiceCfg::from_env());
    for (key, value) in cfg.to_entries() {
        tracing::info!(key, value = %value, "config");
    }
    let timeout = Duration::from_secs(cfg.request_timeout_secs);

    let llm = http::from_env()
        .context("COPYDESK_LLM_API_KEY or OPENAI_API_KEY must be set")?
        .with_timeout(timeout)?;
    tracing::info!(name = LlmProvider::name(&llm), model = llm.model(), "completion provider initialized");

    let embedder = http::embed_from_env()
        .context("COPYDESK_LLM_API_KEY or OPENAI_API_KEY must be set")?
        .with_timeout(timeout)?;
    tracing::info!(
        name = EmbeddingProvider::name(&embedder),
        model = embedder.model(),
        "embedding provider initialized"
    );

    // Corpus loading happens here, before the listener binds: a bad corpus
    // stops startup instead of failing the first request.
    let retriever = build_retriever(&cfg, timeout).await?;

    let pipeline = Arc::new(SuggestionPipeline::new(
        Arc::new(embedder),
        Arc::new(llm),
        retriever,
        cfg.clone(),
    ));

    let guard = ShutdownGuard::new();
    guard.spawn_signal_listener();
    let token = guard.token();

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.port))
        .await
        .with_context(|| format!("failed to bind port {}", cfg.port))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let serve_token = token.clone();
    let server = async move {
        axum::serve(listener, routes::router(pipeline))
            .with_graceful_shutdown(async move { serve_token.cancelled().await })
            .await
    };
    let drain_deadline = async {
        token.cancelled().await;
        tokio::time::sleep(Duration::from_secs(cfg.shutdown_timeout_secs)).await;
    };

    tokio::select! {
        result = server => {
            result.context("server error")?;
            tracing::info!("shutdown complete");
        }
        _ = drain_deadline => {
            tracing::warn!(
                timeout_secs = cfg.shutdown_timeout_secs,
                "in-flight requests did not drain in time, exiting"
            );
        }
    }
    Ok(())
}

async fn build_retriever(cfg: &ServiceCfg, timeout: Duration) -> anyhow::Result<Arc<dyn Retriever>> {
    let retriever: Arc<dyn Retriever> = match cfg.retrieval {
        RetrievalKind::Local => {
            let corpus = CorpusHandle::load(&cfg.corpus_path)
                .await
                .with_context(|| format!("loading corpus from {}", cfg.corpus_path.display()))?;
            if corpus.is_empty() {
                tracing::warn!("corpus is empty; reuse suggestions will always be empty");
            }
            Arc::new(LocalScan::new(corpus))
        }
        RetrievalKind::Remote => {
            let url = cfg.corpus_url.clone().context("COPYDESK_CORPUS_URL must be set for remote retrieval")?;
            Arc::new(RemoteScan::with_timeout(url, timeout)?)
        }
        RetrievalKind::Hosted => {
            let host = cfg.index_host.clone().context("COPYDESK_INDEX_HOST must be set for hosted retrieval")?;
            let key = cfg.index_api_key.clone().context("COPYDESK_INDEX_API_KEY must be set for hosted retrieval")?;
            let client = reqwest::Client::builder().timeout(timeout).build()?;
            let mut index = HostedIndex::with_client(client, host, key);
            if let Some(ns) = cfg.index_namespace.clone() {
                index = index.with_namespace(ns);
            }
            Arc::new(index)
        }
    };
    tracing::info!(retriever = retriever.name(), "retriever ready");
    Ok(retriever)
}
