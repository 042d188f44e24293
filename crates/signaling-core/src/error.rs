use thiserror::Error;

/// Result type for signaling operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the signaling transport.
///
/// None of these are fatal to a consultation: the session keeps its local
/// media and existing peer links when signaling goes away.
#[derive(Error, Debug)]
pub enum Error {
    /// Opening the underlying socket failed
    #[error("Failed to connect to signaling server: {0}")]
    ConnectFailed(String),

    /// A send was attempted while no connection is open
    #[error("Signaling transport is not connected")]
    NotConnected,

    /// The socket rejected an outbound frame
    #[error("Failed to send signaling message: {0}")]
    SendFailed(String),

    /// The transport was closed by the local side
    #[error("Signaling transport closed")]
    Closed,

    /// Encoding or decoding of a signaling frame failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A frame decoded but violated the signaling protocol
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Whether an explicit reconnect could clear this error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::ConnectFailed(_) | Error::NotConnected | Error::Closed)
    }
}
