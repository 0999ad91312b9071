//! Kapso wire payloads and their canonical normalized form.
//!
//! Kapso delivers two shapes on the same endpoint: a batch of message
//! entries (`type` + `data`) and a bare conversation event. Both collapse
//! into one `NormalizedEvent` so everything downstream is shape-agnostic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KapsoText {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KapsoMessage {
    pub id: String,
    #[serde(default, rename = "from")]
    pub sender: Option<String>,
    #[serde(default)]
    pub text: Option<KapsoText>,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub context: Option<Value>,
    /// Kapso-enriched mirror fields (`direction`, `last_message_text`, ...).
    #[serde(default)]
    pub kapso: Option<Map<String, Value>>,
}

impl KapsoMessage {
    /// Message text: `text.body` when non-empty, else the Kapso
    /// `last_message_text` mirror.
    pub fn body_text(&self) -> Option<String> {
        if let Some(text) = &self.text {
            if !text.body.is_empty() {
                return Some(text.body.clone());
            }
        }
        self.kapso
            .as_ref()
            .and_then(|kapso| kapso.get("last_message_text"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    }

    fn direction(&self) -> String {
        self.kapso
            .as_ref()
            .and_then(|kapso| kapso.get("direction"))
            .and_then(Value::as_str)
            .unwrap_or("inbound")
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KapsoConversation {
    pub id: String,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub kapso: Option<Map<String, Value>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub last_active_at: Option<String>,
    #[serde(default)]
    pub phone_number_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KapsoEventEntry {
    pub message: KapsoMessage,
    pub conversation: KapsoConversation,
    pub phone_number_id: String,
    pub is_new_conversation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KapsoBatchPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Vec<KapsoEventEntry>,
    #[serde(default)]
    pub batch: Option<bool>,
    #[serde(default)]
    pub batch_info: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KapsoConversationEventPayload {
    pub conversation: KapsoConversation,
    pub phone_number_id: String,
}

/// One message of a normalized event. `raw` keeps the decoded source object
/// for audit; the core never interprets it.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub body: Option<String>,
    #[serde(rename = "type")]
    pub message_type: String,
    pub direction: String,
    pub timestamp: Option<String>,
    pub raw: Value,
}

/// Canonical event forwarded to agents. Absent fields serialize as `null`
/// so consumers always see the full field set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizedEvent {
    pub event_type: String,
    pub conversation_id: Option<String>,
    pub owner_id: Option<String>,
    pub contact_id: Option<String>,
    pub phone_number: Option<String>,
    pub phone_number_id: Option<String>,
    pub messages: Vec<NormalizedMessage>,
    pub metadata: Map<String, Value>,
    pub headers: HashMap<String, String>,
    pub idempotency_key: Option<String>,
    pub batch: bool,
}

/// The two wire shapes, tried in declaration order.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum KapsoWebhook {
    Batch(KapsoBatchPayload),
    ConversationEvent(KapsoConversationEventPayload),
}

impl KapsoWebhook {
    /// Parse a raw body. The batch shape is attempted first; when both fail,
    /// the conversation-event error is the one reported.
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        if let Ok(batch) = serde_json::from_slice::<KapsoBatchPayload>(raw) {
            return Ok(Self::Batch(batch));
        }
        serde_json::from_slice::<KapsoConversationEventPayload>(raw).map(Self::ConversationEvent)
    }

    /// Collapse the payload into a `NormalizedEvent`.
    ///
    /// Batch accumulation is first-wins: `conversation_id`, `phone_number`,
    /// `phone_number_id`, `owner_id` and `contact_id` come from the first
    /// entry that supplies a non-empty value, tolerating partial fields
    /// across the batch.
    pub fn to_normalized(&self, headers: &HashMap<String, String>) -> NormalizedEvent {
        let event_type = headers.get("x-webhook-event").cloned().unwrap_or_default();
        let idempotency_key = headers.get("x-idempotency-key").cloned();

        let mut metadata = Map::new();
        metadata.insert(
            "headers".to_string(),
            serde_json::to_value(headers).unwrap_or_default(),
        );

        let mut conversation_id: Option<String> = None;
        let mut owner_id: Option<String> = None;
        let mut contact_id: Option<String> = None;
        let mut phone_number: Option<String> = None;
        let mut phone_number_id: Option<String> = None;
        let mut messages: Vec<NormalizedMessage> = Vec::new();
        let mut batch = false;

        match self {
            Self::Batch(payload) => {
                metadata.insert(
                    "batch_info".to_string(),
                    Value::Object(payload.batch_info.clone().unwrap_or_default()),
                );
                metadata.insert(
                    "kapso_type".to_string(),
                    Value::String(payload.kind.clone()),
                );
                batch = payload.data.len() > 1;

                for entry in &payload.data {
                    let message = &entry.message;
                    messages.push(NormalizedMessage {
                        id: message.id.clone(),
                        body: message.body_text(),
                        message_type: message.message_type.clone(),
                        direction: message.direction(),
                        timestamp: message.timestamp.clone(),
                        raw: serde_json::to_value(message).unwrap_or_default(),
                    });

                    let conversation = &entry.conversation;
                    if conversation_id.is_none() {
                        conversation_id = Some(conversation.id.clone());
                    }
                    if phone_number.is_none() {
                        phone_number = non_empty(conversation.phone_number.as_deref());
                    }
                    if phone_number_id.is_none() {
                        phone_number_id = non_empty(Some(&entry.phone_number_id))
                            .or_else(|| non_empty(conversation.phone_number_id.as_deref()));
                    }

                    let meta = conversation.metadata.clone().unwrap_or_default();
                    metadata
                        .entry("conversation_metadata")
                        .or_insert_with(|| Value::Object(meta.clone()));
                    if !metadata.contains_key("flow") {
                        if let Some(flow) = string_field(&meta, "flow") {
                            metadata.insert("flow".to_string(), Value::String(flow));
                        }
                    }
                    if owner_id.is_none() {
                        owner_id = string_field(&meta, "owner_id")
                            .or_else(|| string_field(&meta, "owner_slug"));
                    }
                    if contact_id.is_none() {
                        contact_id = string_field(&meta, "contact_id")
                            .or_else(|| string_field(&meta, "target_id"));
                    }
                }
            }
            Self::ConversationEvent(payload) => {
                metadata.insert(
                    "kapso_type".to_string(),
                    Value::String("conversation_event".to_string()),
                );

                let conversation = &payload.conversation;
                conversation_id = Some(conversation.id.clone());
                phone_number = conversation.phone_number.clone();
                phone_number_id = Some(payload.phone_number_id.clone());

                let meta = conversation.metadata.clone().unwrap_or_default();
                if let Some(flow) = string_field(&meta, "flow") {
                    metadata.insert("flow".to_string(), Value::String(flow));
                }
                owner_id = string_field(&meta, "owner_id")
                    .or_else(|| string_field(&meta, "owner_slug"));
                contact_id = string_field(&meta, "contact_id")
                    .or_else(|| string_field(&meta, "target_id"));
                metadata.insert("conversation_metadata".to_string(), Value::Object(meta));

                let kapso = conversation.kapso.clone().unwrap_or_default();
                messages.push(NormalizedMessage {
                    id: format!("{}-latest", conversation.id),
                    body: kapso
                        .get("last_message_text")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned),
                    message_type: "text".to_string(),
                    direction: kapso
                        .get("direction")
                        .and_then(Value::as_str)
                        .unwrap_or("inbound")
                        .to_string(),
                    timestamp: kapso
                        .get("last_message_timestamp")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned),
                    raw: serde_json::to_value(conversation).unwrap_or_default(),
                });
            }
        }

        NormalizedEvent {
            event_type,
            conversation_id,
            owner_id,
            contact_id,
            phone_number,
            phone_number_id,
            messages,
            metadata,
            headers: headers.clone(),
            idempotency_key,
            batch,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(ToOwned::to_owned)
}

fn string_field(meta: &Map<String, Value>, key: &str) -> Option<String> {
    meta.get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}
