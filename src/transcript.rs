//! Flatten a webhook payload into a `User:`/`Assistant:` transcript.

use crate::normalize::KapsoWebhook;
use serde_json::Value;

/// One line per message that carries text. Only `text.body` counts for batch
/// entries; the conversation-event shape falls back to the Kapso
/// `last_message_text` mirror and is always attributed to the user.
pub fn build_transcript(payload: &KapsoWebhook) -> String {
    let mut turns: Vec<String> = Vec::new();

    match payload {
        KapsoWebhook::Batch(batch) => {
            for entry in &batch.data {
                let message = &entry.message;
                let inbound = message
                    .kapso
                    .as_ref()
                    .and_then(|kapso| kapso.get("direction"))
                    .and_then(Value::as_str)
                    == Some("inbound");
                let sender = if inbound { "User" } else { "Assistant" };
                let body = message
                    .text
                    .as_ref()
                    .map(|text| text.body.as_str())
                    .unwrap_or("");
                if !body.is_empty() {
                    turns.push(format!("{sender}: {body}"));
                }
            }
        }
        KapsoWebhook::ConversationEvent(event) => {
            let last_text = event
                .conversation
                .kapso
                .as_ref()
                .and_then(|kapso| kapso.get("last_message_text"))
                .and_then(Value::as_str)
                .unwrap_or("");
            if !last_text.is_empty() {
                turns.push(format!("User: {last_text}"));
            }
        }
    }

    turns.join("\n").trim().to_string()
}
