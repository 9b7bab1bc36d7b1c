//! Asya call daemon
//!
//! Long-running process that owns the session registry. The PBX side feeds it over two
//! WebSocket endpoints (ARI events and raw caller audio, see [`routes`]); unsaved call records
//! are retried on a fixed tick; Ctrl-C drains every live call before exit.

mod routes;

use anyhow::Context;
use asya_core::{AsyaConfig, SledCallStore};
use asya_voice::{
    AriClient, Capabilities, DialogPolicy, LlmBackend, LogOnlyTelephony, OpenAiChat, OpenAiStt,
    OpenAiTts, PlaceholderLlm, PlaceholderStt, PlaceholderTts, SessionRegistry, SttBackend,
    Telephony, TtsBackend, VadConfig, WebRtcVad,
};
use std::{path::Path as StdPath, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Retry interval for call records whose commit failed at hang-up.
const FLUSH_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[asya-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AsyaConfig::load().context("load AsyaConfig")?;
    let policy = Arc::new(DialogPolicy::from_settings(&config.dialog).context("load dialog policy")?);
    let caps = capabilities(&config)?;
    let vad = Arc::new(
        WebRtcVad::new(VadConfig {
            sample_rate: config.dialog.sample_rate,
            ..VadConfig::default()
        })
        .context("init VAD")?,
    );

    let calls_path = StdPath::new(&config.storage_path).join("calls");
    let store = Arc::new(
        SledCallStore::open_path(&calls_path)
            .with_context(|| format!("open call store at {}", calls_path.display()))?,
    );

    let registry = Arc::new(SessionRegistry::new(caps, policy, store, vad));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("bind {}", config.listen_addr))?;
    let stop = CancellationToken::new();
    let server = {
        let app = routes::router(Arc::clone(&registry));
        let stop = stop.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
        })
    };

    tracing::info!(
        app = %config.app_name,
        listen_addr = %config.listen_addr,
        storage_path = %config.storage_path,
        "Asya daemon started"
    );

    let mut flush = tokio::time::interval(Duration::from_secs(FLUSH_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = flush.tick() => {
                if registry.unsaved_count() > 0 {
                    let saved = registry.flush_unsaved().await;
                    tracing::info!(saved, left = registry.unsaved_count(), "unsaved calls retried");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; draining calls");
                break;
            }
        }
    }

    stop.cancel();
    registry.shutdown().await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "server stopped with error"),
        Err(e) => tracing::warn!(error = %e, "server task failed"),
    }
    tracing::info!("Asya daemon stopped");
    Ok(())
}

/// HTTP backends when credentials are configured, placeholders otherwise.
fn capabilities(config: &AsyaConfig) -> anyhow::Result<Capabilities> {
    let stt: Arc<dyn SttBackend> = if config.stt.api_key.is_some() {
        Arc::new(OpenAiStt::new(&config.stt)?)
    } else {
        tracing::warn!("stt.api_key not set; using placeholder STT");
        Arc::new(PlaceholderStt::new())
    };
    let llm: Arc<dyn LlmBackend> = if config.llm.api_key.is_some() {
        Arc::new(OpenAiChat::new(&config.llm)?)
    } else {
        tracing::warn!("llm.api_key not set; using placeholder LLM");
        Arc::new(PlaceholderLlm::default())
    };
    let tts: Arc<dyn TtsBackend> = if config.tts.api_key.is_some() {
        Arc::new(OpenAiTts::new(&config.tts)?)
    } else {
        tracing::warn!("tts.api_key not set; using placeholder TTS");
        Arc::new(PlaceholderTts::default())
    };
    let telephony: Arc<dyn Telephony> = if config.ari.username.trim().is_empty() {
        tracing::warn!("ari.username not set; telephony commands are only logged");
        Arc::new(LogOnlyTelephony)
    } else {
        Arc::new(AriClient::new(&config.ari)?)
    };
    Ok(Capabilities {
        stt,
        llm,
        tts,
        telephony,
    })
}
