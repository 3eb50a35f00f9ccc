//! `hearthclaw serve` — the inbound HTTP endpoint.
//!
//! `POST /inbound` accepts an `InboundRequest` body. Synchronous
//! requests (callback `host == "inbound"`, `port == 0`) wait — bounded —
//! for the reply and return it in-band; anything else is acknowledged
//! immediately and replied to through the outbound delivery worker.

use crate::commands::{Runtime, build_runtime};
use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hearthclaw_config::AppConfig;
use hearthclaw_core::request::InboundRequest;
use hearthclaw_pipeline::InboundJob;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Clone)]
struct AppState {
    inbound_tx: mpsc::Sender<InboundJob>,
    sync_reply_timeout: Duration,
}

pub async fn run(config_path: &Path, port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = AppConfig::load_or_default(config_path).context("loading config")?;
    if let Some(port) = port_override {
        config.server.port = port;
    }

    let Runtime {
        inbound_tx,
        sync_reply_timeout,
        ..
    } = build_runtime(&config)?;

    let state = AppState {
        inbound_tx,
        sync_reply_timeout,
    };
    let app = Router::new()
        .route("/inbound", post(inbound))
        .route("/health", get(health))
        .with_state(Arc::new(state));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(addr = %addr, "Hearthclaw listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await.context("serving HTTP")?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn inbound(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InboundRequest>,
) -> Response {
    let request_id = request.request_id.clone();

    if request.is_sync_inbound() {
        let (job, reply_rx) = InboundJob::synchronous(request);
        if state.inbound_tx.send(job).await.is_err() {
            return (StatusCode::SERVICE_UNAVAILABLE, "engine unavailable").into_response();
        }
        return match tokio::time::timeout(state.sync_reply_timeout, reply_rx).await {
            Ok(Ok(text)) => Json(serde_json::json!({
                "request_id": request_id,
                "text": text,
                "format": "text",
            }))
            .into_response(),
            Ok(Err(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "request was dropped").into_response()
            }
            Err(_) => (StatusCode::GATEWAY_TIMEOUT, "reply timed out").into_response(),
        };
    }

    if state
        .inbound_tx
        .send(InboundJob::asynchronous(request))
        .await
        .is_err()
    {
        return (StatusCode::SERVICE_UNAVAILABLE, "engine unavailable").into_response();
    }
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "accepted",
            "request_id": request_id,
        })),
    )
        .into_response()
}
