//! Axum HTTP surface: the Cloud API verification handshake and the event
//! receiver.
//!
//! The receiver acknowledges every POST with 200 regardless of content;
//! failing to do so makes Meta retry and eventually disable the webhook.

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bot::normalize::{self, Envelope};
use crate::bot::router::ConversationRouter;

#[derive(Clone)]
pub struct AppState {
    pub verify_token: String,
    pub router: Arc<ConversationRouter>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/webhook", get(verify).post(receive))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// Meta's subscription handshake: echo the challenge only when the mode is
/// `subscribe` and the token matches.
fn verify_subscription(expected: &str, mode: Option<&str>, token: Option<&str>) -> bool {
    mode == Some("subscribe") && token == Some(expected)
}

async fn verify(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> (StatusCode, String) {
    if verify_subscription(
        &state.verify_token,
        params.mode.as_deref(),
        params.verify_token.as_deref(),
    ) {
        info!("✅ Webhook subscription verified");
        (StatusCode::OK, params.challenge.unwrap_or_default())
    } else {
        warn!("Webhook verification rejected (mode={:?})", params.mode);
        (StatusCode::FORBIDDEN, "Forbidden".to_string())
    }
}

/// Event receiver. The body is taken as a raw string and parsed leniently;
/// processing happens on a detached task so the 200 goes back immediately.
async fn receive(State(state): State<AppState>, body: String) -> (StatusCode, &'static str) {
    match serde_json::from_str::<Envelope>(&body) {
        Ok(envelope) => {
            if let Some(msg) = normalize::normalize(&envelope) {
                let router = state.router.clone();
                tokio::spawn(async move {
                    router.handle(msg).await;
                });
            } else {
                debug!("Webhook delivery carried no actionable message");
            }
        }
        Err(e) => {
            warn!("Unparseable webhook body ({} bytes): {e}", body.len());
        }
    }

    (StatusCode::OK, "EVENT_RECEIVED")
}
