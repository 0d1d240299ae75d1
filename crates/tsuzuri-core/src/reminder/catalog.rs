//! Message catalog seam.
//!
//! Reminder copy lives outside the core; the pipeline only needs a pure
//! stage-to-content lookup at send time.

use serde::{Deserialize, Serialize};

use crate::reminder::ReminderStage;

/// Notification content handed to the push payload, shaped for a web
/// client: visible title and body plus free-form data for the client app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RenderedMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: serde_json::Value::Null,
        }
    }
}

/// Stage-keyed message lookup. Implementations must be infallible: every
/// stage the targeting step can emit gets content.
pub trait MessageCatalog: Send + Sync {
    fn render(&self, stage: ReminderStage) -> RenderedMessage;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_message_serializes_for_the_push_payload() {
        let mut message = RenderedMessage::new("Journal", "Time to write.");
        message.data = serde_json::json!({ "stage": "main" });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["title"], "Journal");
        assert_eq!(json["body"], "Time to write.");
        assert_eq!(json["data"]["stage"], "main");
    }
}
