use async_trait::async_trait;

use crate::error::Result;
use crate::profile::{MediaConstraints, VideoConstraints};
use crate::stream::LocalStream;
use crate::track::LocalTrack;

/// Platform capture backend (camera, microphone and display capture).
///
/// Errors from the acquire methods should use `PermissionDenied` or
/// `DeviceUnavailable` so callers can tell acquisition failures apart.
#[async_trait]
pub trait MediaSource: Send + Sync + std::fmt::Debug {
    /// Open camera and/or microphone
    async fn acquire_user_media(&self, constraints: &MediaConstraints) -> Result<LocalStream>;

    /// Open a display capture track for screen sharing
    async fn acquire_display(&self) -> Result<LocalTrack>;

    /// Re-configure a running camera track
    async fn apply_constraints(&self, track: &LocalTrack, constraints: &VideoConstraints) -> Result<()>;

    /// Release the device behind a track
    async fn stop_track(&self, track: &LocalTrack) -> Result<()>;
}
