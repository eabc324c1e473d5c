//! Inbound webhook payload parsing and sender canonicalization.
//!
//! The Cloud API wraps every delivery in entry/changes/value envelopes;
//! only `value.messages` entries are actionable. Delivery-status callbacks
//! and unknown message types normalize to `None` and are acknowledged
//! without further processing.

use serde::Deserialize;
use tracing::debug;

/// Mexican mobile numbers arrive with a `521` routing prefix from some
/// clients and a plain `52` from others. Canonicalize to `52` so both map
/// to the same session key.
const MX_ROUTING_PREFIX: &str = "521";
const MX_COUNTRY_CODE: &str = "52";

#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    pub value: ChangeValue,
}

#[derive(Debug, Deserialize)]
pub struct ChangeValue {
    pub messages: Option<Vec<ProviderMessage>>,
    pub statuses: Option<Vec<DeliveryStatus>>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderMessage {
    pub from: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: Option<TextBody>,
    pub interactive: Option<Interactive>,
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct Interactive {
    pub button_reply: Option<ButtonReply>,
}

#[derive(Debug, Deserialize)]
pub struct ButtonReply {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct DeliveryStatus {
    pub id: String,
    pub status: String,
}

/// How the user produced the text: typed, or picked from a button list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Choice,
}

/// A canonical inbound message, ready for routing.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Canonical sender id (routing prefix already stripped).
    pub user_id: String,
    pub kind: MessageKind,
    pub text: String,
}

/// Strip the redundant `521` routing prefix down to the canonical `52` form.
/// Applied exactly once, before any session or turn-log lookup.
pub fn canonical_user_id(raw: &str) -> String {
    match raw.strip_prefix(MX_ROUTING_PREFIX) {
        Some(rest) => format!("{MX_COUNTRY_CODE}{rest}"),
        None => raw.to_string(),
    }
}

/// Extract the first actionable message from a webhook envelope.
///
/// Returns `None` for status-only deliveries and malformed payloads; the
/// webhook handler still acknowledges those with 200.
pub fn normalize(envelope: &Envelope) -> Option<InboundMessage> {
    for entry in &envelope.entry {
        for change in &entry.changes {
            if let Some(statuses) = &change.value.statuses {
                for s in statuses {
                    debug!("delivery status {}: {}", s.id, s.status);
                }
            }

            let Some(messages) = &change.value.messages else {
                continue;
            };

            for msg in messages {
                let (kind, text) = match msg.kind.as_str() {
                    "text" => match &msg.text {
                        Some(t) => (MessageKind::Text, t.body.clone()),
                        None => continue,
                    },
                    "interactive" => {
                        match msg.interactive.as_ref().and_then(|i| i.button_reply.as_ref()) {
                            Some(reply) => (MessageKind::Choice, reply.title.clone()),
                            None => continue,
                        }
                    }
                    other => {
                        debug!("ignoring unsupported message type: {other}");
                        continue;
                    }
                };

                return Some(InboundMessage {
                    user_id: canonical_user_id(&msg.from),
                    kind,
                    text,
                });
            }
        }
    }

    None
}
