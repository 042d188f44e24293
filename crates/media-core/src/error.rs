use thiserror::Error;

/// Result type for media operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for local media capture and quality sampling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The user or platform refused access to a capture device
    #[error("Permission denied for {device}")]
    PermissionDenied {
        /// Device that was requested ("camera", "microphone", "display")
        device: String,
    },

    /// The device is missing, busy or failed to start
    #[error("{device} unavailable: {reason}")]
    DeviceUnavailable {
        device: String,
        reason: String,
    },

    /// An operation needed local media before it was acquired
    #[error("Local media has not been acquired")]
    NotAcquired,

    /// Local media was already released
    #[error("Local media has been released")]
    Released,

    /// Starting or stopping the display capture failed
    #[error("Screen share error: {0}")]
    ScreenShare(String),

    /// The device rejected new capture constraints
    #[error("Failed to apply constraints: {0}")]
    Constraints(String),

    /// Reading transport statistics failed
    #[error("Stats unavailable: {0}")]
    Stats(String),
}

impl Error {
    /// Whether this error came from acquiring a capture device
    pub fn is_acquisition_error(&self) -> bool {
        matches!(self, Error::PermissionDenied { .. } | Error::DeviceUnavailable { .. })
    }

    pub fn permission_denied(device: impl Into<String>) -> Self {
        Error::PermissionDenied { device: device.into() }
    }

    pub fn device_unavailable(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::DeviceUnavailable { device: device.into(), reason: reason.into() }
    }
}
