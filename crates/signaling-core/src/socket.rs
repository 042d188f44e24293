use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Close code for a user-initiated, orderly shutdown
pub const NORMAL_CLOSURE: u16 = 1000;

/// Events produced by an open socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame arrived
    Text(String),
    /// The connection closed; `clean` is false for drops and abnormal codes
    Closed { code: u16, reason: String, clean: bool },
    /// A read error that did not necessarily end the connection
    Error(String),
}

/// Message-oriented duplex connection to the signaling server.
///
/// `open` may be called again after a close to establish a new connection;
/// each call returns a fresh event receiver.
#[async_trait]
pub trait SignalingSocket: Send + Sync + std::fmt::Debug {
    /// Open the connection for `session_id` as `participant_id`
    async fn open(&self, session_id: &str, participant_id: &str) -> Result<mpsc::Receiver<SocketEvent>>;

    /// Send one text frame
    async fn send_text(&self, text: String) -> Result<()>;

    /// Close the connection with the given code and reason
    async fn close(&self, code: u16, reason: &str) -> Result<()>;

    /// Whether the connection is currently open
    fn is_open(&self) -> bool;
}
