//! Interface to the session archive service
//!
//! The archive stores finished consultation summaries and shared files. Only
//! the contract lives here; storage backends are provided by the application.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::ChannelMessage;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Failed to save session: {0}")]
    Save(String),

    #[error("Archive unavailable: {0}")]
    Unavailable(String),
}

/// Record of a finished consultation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub participants: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub messages: Vec<ChannelMessage>,
    pub attachment_urls: Vec<String>,
}

/// File shared during a consultation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self { name: name.into(), mime_type: mime_type.into(), data }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Where the archive stored an uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub url: String,
    pub key: String,
}

#[async_trait]
pub trait SessionArchive: Send + Sync + std::fmt::Debug {
    /// Persist the summary of an ended session
    async fn save_session(&self, summary: &SessionSummary) -> Result<(), ArchiveError>;

    /// Store a shared file and return its location
    async fn upload_file(&self, upload: &FileUpload) -> Result<UploadedFile, ArchiveError>;
}
