//! WhatsApp Cloud API client.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{info, warn};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";

/// Outbound message delivery. The router only talks to this trait so tests
/// can record sends instead of hitting the network.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), String>;
    async fn send_buttons(&self, to: &str, body: &str, buttons: &[String]) -> Result<(), String>;
    async fn send_image(&self, to: &str, link: &str, caption: &str) -> Result<(), String>;
}

/// Cloud API client bound to one business phone number.
pub struct WhatsAppClient {
    token: String,
    phone_number_id: String,
    http: reqwest::Client,
}

impl WhatsAppClient {
    pub fn new(token: String, phone_number_id: String) -> Self {
        Self {
            token,
            phone_number_id,
            // Every send must carry this timeout; a default client has none.
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    async fn post_message(&self, payload: Value) -> Result<(), String> {
        let url = format!("{GRAPH_API_BASE}/{}/messages", self.phone_number_id);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                let msg = format!("Failed to reach Cloud API: {e}");
                warn!("{}", msg);
                msg
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let msg = format!("Cloud API rejected message: {status}: {body}");
            warn!("{}", msg);
            return Err(msg);
        }

        Ok(())
    }
}

#[async_trait]
impl Outbound for WhatsAppClient {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), String> {
        info!("📤 Sending text to {} ({} chars)", to, body.len());
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body },
        }))
        .await
    }

    async fn send_buttons(&self, to: &str, body: &str, buttons: &[String]) -> Result<(), String> {
        info!("📤 Sending {} buttons to {}", buttons.len(), to);

        // The Cloud API caps interactive replies at three buttons.
        let buttons: Vec<Value> = buttons
            .iter()
            .take(3)
            .enumerate()
            .map(|(i, title)| {
                json!({
                    "type": "reply",
                    "reply": { "id": format!("btn_{i}"), "title": title },
                })
            })
            .collect();

        self.post_message(json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "interactive",
            "interactive": {
                "type": "button",
                "body": { "text": body },
                "action": { "buttons": buttons },
            },
        }))
        .await
    }

    async fn send_image(&self, to: &str, link: &str, caption: &str) -> Result<(), String> {
        info!("📤 Sending image to {}", to);
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "image",
            "image": { "link": link, "caption": caption },
        }))
        .await
    }
}
