//! Video capture profiles

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resolution and frame rate requested from a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Named capture profile selected from network quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoProfile {
    /// 320x240 at 15 fps
    Low,
    /// 640x480 at 24 fps
    Medium,
    /// 1280x720 at 30 fps
    High,
}

impl VideoProfile {
    pub fn constraints(&self) -> VideoConstraints {
        match self {
            VideoProfile::Low => VideoConstraints { width: 320, height: 240, frame_rate: 15 },
            VideoProfile::Medium => VideoConstraints { width: 640, height: 480, frame_rate: 24 },
            VideoProfile::High => VideoConstraints { width: 1280, height: 720, frame_rate: 30 },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoProfile::Low => "low",
            VideoProfile::Medium => "medium",
            VideoProfile::High => "high",
        }
    }
}

impl Default for VideoProfile {
    fn default() -> Self {
        VideoProfile::Medium
    }
}

impl fmt::Display for VideoProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to request when opening camera and microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    /// `None` requests no camera
    pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
    /// Microphone plus a camera at `profile`
    pub fn for_profile(profile: VideoProfile) -> Self {
        Self { audio: true, video: Some(profile.constraints()) }
    }
}
