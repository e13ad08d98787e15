use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key/value attributes travelling alongside a payload.
pub type Attributes = BTreeMap<String, String>;

/// Raw payload as delivered by a transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    /// Set when the transport reports this is not the first delivery attempt.
    #[serde(default)]
    pub redelivered: bool,
}

impl Message {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    pub fn data_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// A pulled message plus the identifier the caller hands back to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub message: Message,
    pub ack_id: String,
}

impl ReceivedMessage {
    pub fn new(message: Message, ack_id: impl Into<String>) -> Self {
        Self {
            message,
            ack_id: ack_id.into(),
        }
    }
}

/// Result of a pull. An empty response means nothing arrived within the timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(default)]
    pub received_messages: Vec<ReceivedMessage>,
}

impl PullResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(received_messages: Vec<ReceivedMessage>) -> Self {
        Self { received_messages }
    }

    pub fn is_empty(&self) -> bool {
        self.received_messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.received_messages.len()
    }

    pub fn first(&self) -> Option<&ReceivedMessage> {
        self.received_messages.first()
    }

    pub fn ack_ids(&self) -> Vec<String> {
        self.received_messages
            .iter()
            .map(|received| received.ack_id.clone())
            .collect()
    }
}

impl IntoIterator for PullResponse {
    type Item = ReceivedMessage;
    type IntoIter = std::vec::IntoIter<ReceivedMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.received_messages.into_iter()
    }
}

/// Outcome of a publish. Transports without server-assigned ids leave `message_id` empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl PublishResult {
    pub fn unassigned() -> Self {
        Self::default()
    }

    pub fn with_id(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
        }
    }

    /// The assigned identifier, or an empty string when the transport does not assign one.
    pub fn result(&self) -> &str {
        self.message_id.as_deref().unwrap_or_default()
    }
}
