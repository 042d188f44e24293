//! Data channel message envelope
//!
//! Frames are `{ "type": "message" | "file", "payload": {...} }`. Frames of any
//! other type are skipped so newer peers can add kinds without breaking us.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::archive::{FileUpload, UploadedFile};
use crate::error::{Result, SessionError};

/// Chat text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMessage {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Announcement of a file stored in the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNotice {
    pub id: String,
    pub sender: String,
    pub url: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// Not every peer stamps file notices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Message exchanged over a peer data channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ChannelMessage {
    #[serde(rename = "message")]
    Text(TextMessage),
    #[serde(rename = "file")]
    FileNotice(FileNotice),
}

impl ChannelMessage {
    pub fn text(sender: impl Into<String>, content: impl Into<String>) -> Self {
        ChannelMessage::Text(TextMessage {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            content: content.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn file(sender: impl Into<String>, upload: &FileUpload, stored: &UploadedFile) -> Self {
        ChannelMessage::FileNotice(FileNotice {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            url: stored.url.clone(),
            name: upload.name.clone(),
            mime_type: upload.mime_type.clone(),
            size: upload.size(),
            timestamp: Some(Utc::now()),
        })
    }

    pub fn id(&self) -> &str {
        match self {
            ChannelMessage::Text(m) => &m.id,
            ChannelMessage::FileNotice(m) => &m.id,
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            ChannelMessage::Text(m) => &m.sender,
            ChannelMessage::FileNotice(m) => &m.sender,
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SessionError::Channel(e.to_string()))
    }

    /// Decode one frame; `None` for unknown kinds and malformed input
    pub fn decode(text: &str) -> Option<Self> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Dropping malformed data channel frame: {}", e);
                return None;
            }
        };

        match value.get("type").and_then(Value::as_str) {
            Some("message") | Some("file") => {}
            other => {
                debug!("Ignoring data channel frame of type {:?}", other);
                return None;
            }
        }

        match serde_json::from_value(value) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Dropping invalid data channel payload: {}", e);
                None
            }
        }
    }
}
