//! Claude-backed free-form assistant.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::bot::memory::{Role, Turn};

const MODEL: &str = "claude-haiku-4-5-20251001";
const MAX_TOKENS: u32 = 512;

/// Free-form reply generation over a window of recent turns. Behind a trait
/// so the router can be tested without a live API.
#[async_trait]
pub trait Assistant: Send + Sync {
    /// `turns` is the recent window, oldest-first; the incoming user
    /// message is already the last entry.
    async fn reply(&self, persona: &str, turns: &[Turn]) -> Result<String, Error>;
}

pub struct Client {
    api_key: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'static str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

/// Shape stored turns into the alternating form the Messages API expects:
/// drop leading assistant turns, merge consecutive same-role turns.
fn to_api_messages(turns: &[Turn]) -> Vec<ApiMessage> {
    let mut messages: Vec<ApiMessage> = Vec::new();

    for turn in turns {
        let role = match turn.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        if let Some(last) = messages.last_mut()
            && last.role == role
        {
            last.content.push('\n');
            last.content.push_str(&turn.content);
            continue;
        }

        if messages.is_empty() && role == "assistant" {
            continue;
        }

        messages.push(ApiMessage {
            role,
            content: turn.content.clone(),
        });
    }

    messages
}

impl Client {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            // Every call must carry this timeout; a default client has none.
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }
}

#[async_trait]
impl Assistant for Client {
    async fn reply(&self, persona: &str, turns: &[Turn]) -> Result<String, Error> {
        let messages = to_api_messages(turns);
        if messages.is_empty() {
            return Err(Error::Empty);
        }

        let request = ApiRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system: persona,
            messages,
        };

        let response = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        api_response
            .content
            .first()
            .map(|c| c.text.clone())
            .ok_or(Error::Empty)
    }
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}
