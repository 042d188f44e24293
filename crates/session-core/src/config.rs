//! Session configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use telecare_media_core::quality::DEFAULT_SAMPLE_INTERVAL;
use telecare_media_core::VideoProfile;

use crate::error::{Result, SessionError};

/// Configuration for a consultation session.
///
/// Durations are expressed in milliseconds when loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Signaling server URL (`ws://` or `wss://`)
    pub signaling_url: Option<String>,
    /// Endpoint returning `{ iceServers: [...] }`
    pub ice_config_url: Option<String>,
    /// Timeout for the ICE configuration request
    #[serde(with = "millis")]
    pub ice_config_timeout: Duration,
    /// Time between quality samples
    #[serde(with = "millis")]
    pub quality_sample_interval: Duration,
    /// Maximum time a participant may spend negotiating before being closed
    #[serde(with = "millis")]
    pub negotiation_timeout: Duration,
    /// Capture profile used when acquiring the camera
    pub initial_profile: VideoProfile,
    /// Change the capture profile when quality changes
    pub adaptive_quality: bool,
    /// Label of the per-peer data channel
    pub data_channel_label: String,
    /// Messages buffered per participant before the channel opens
    pub pending_message_limit: usize,
    /// Capacity of the internal and UI event channels
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: None,
            ice_config_url: None,
            ice_config_timeout: Duration::from_secs(5),
            quality_sample_interval: DEFAULT_SAMPLE_INTERVAL,
            negotiation_timeout: Duration::from_secs(30),
            initial_profile: VideoProfile::Medium,
            adaptive_quality: true,
            data_channel_label: "consultation".to_string(),
            pending_message_limit: 64,
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(text).map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.quality_sample_interval.is_zero() {
            return Err(SessionError::Config("quality_sample_interval must be positive".into()));
        }
        if self.negotiation_timeout.is_zero() {
            return Err(SessionError::Config("negotiation_timeout must be positive".into()));
        }
        if self.data_channel_label.is_empty() {
            return Err(SessionError::Config("data_channel_label must not be empty".into()));
        }
        if self.event_capacity == 0 {
            return Err(SessionError::Config("event_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn with_signaling_url(mut self, url: impl Into<String>) -> Self {
        self.signaling_url = Some(url.into());
        self
    }

    pub fn with_ice_config_url(mut self, url: impl Into<String>) -> Self {
        self.ice_config_url = Some(url.into());
        self
    }

    pub fn with_quality_sample_interval(mut self, interval: Duration) -> Self {
        self.quality_sample_interval = interval;
        self
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn with_initial_profile(mut self, profile: VideoProfile) -> Self {
        self.initial_profile = profile;
        self
    }

    pub fn with_adaptive_quality(mut self, enabled: bool) -> Self {
        self.adaptive_quality = enabled;
        self
    }

    pub fn with_data_channel_label(mut self, label: impl Into<String>) -> Self {
        self.data_channel_label = label.into();
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
