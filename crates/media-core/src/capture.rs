//! Local media capture control
//!
//! [`MediaCaptureController`] owns the tracks of the local participant. Mute
//! toggles flip the existing tracks in place, quality changes re-configure the
//! running camera, and screen sharing swaps which track is the outgoing video
//! without touching the camera.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::profile::{MediaConstraints, VideoProfile};
use crate::source::MediaSource;
use crate::stream::LocalStream;
use crate::track::LocalTrack;

/// Controller for the local participant's capture devices
pub struct MediaCaptureController {
    source: Arc<dyn MediaSource>,
    stream: Option<LocalStream>,
    screen: Option<LocalTrack>,
    profile: VideoProfile,
    released: bool,
}

impl MediaCaptureController {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self {
            source,
            stream: None,
            screen: None,
            profile: VideoProfile::default(),
            released: false,
        }
    }

    /// Open camera and microphone at `profile`.
    ///
    /// Calling again after a successful acquire returns the same stream.
    pub async fn acquire(&mut self, profile: VideoProfile) -> Result<LocalStream> {
        if self.released {
            return Err(Error::Released);
        }
        if let Some(stream) = &self.stream {
            debug!("Local media already acquired, reusing stream {}", stream.id);
            return Ok(stream.clone());
        }

        let constraints = MediaConstraints::for_profile(profile);
        let stream = self.source.acquire_user_media(&constraints).await?;
        if stream.is_empty() {
            return Err(Error::device_unavailable("camera and microphone", "no tracks returned"));
        }

        if let (Some(video), Some(requested)) = (&stream.video, constraints.video) {
            video.set_constraints(requested);
        }
        self.profile = profile;

        info!(
            stream = %stream.id,
            audio = stream.audio.is_some(),
            video = stream.video.is_some(),
            profile = %profile,
            "Local media acquired"
        );
        self.stream = Some(stream.clone());
        Ok(stream)
    }

    fn stream(&self) -> Result<&LocalStream> {
        if self.released {
            return Err(Error::Released);
        }
        self.stream.as_ref().ok_or(Error::NotAcquired)
    }

    fn camera(&self) -> Result<&LocalTrack> {
        self.stream()?.video.as_ref().ok_or(Error::NotAcquired)
    }

    /// Flip the camera track's enabled flag; returns the new state
    pub fn toggle_video(&mut self) -> Result<bool> {
        let track = self.camera()?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        debug!("Camera {}", if enabled { "enabled" } else { "disabled" });
        Ok(enabled)
    }

    /// Flip the microphone track's enabled flag; returns the new state
    pub fn toggle_audio(&mut self) -> Result<bool> {
        let track = self.stream()?.audio.as_ref().ok_or(Error::NotAcquired)?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        debug!("Microphone {}", if enabled { "unmuted" } else { "muted" });
        Ok(enabled)
    }

    /// Start sharing the screen.
    ///
    /// Returns `Ok(false)` when the user declines the capture prompt and
    /// `Ok(true)` when sharing is active, including when it already was.
    pub async fn share_screen(&mut self) -> Result<bool> {
        self.stream()?;
        if self.screen.is_some() {
            return Ok(true);
        }

        match self.source.acquire_display().await {
            Ok(track) => {
                info!("Screen share started with track {}", track.id());
                self.screen = Some(track);
                Ok(true)
            }
            Err(Error::PermissionDenied { .. }) => {
                info!("Screen share declined");
                Ok(false)
            }
            Err(e) => Err(Error::ScreenShare(e.to_string())),
        }
    }

    /// Stop sharing and fall back to the camera; returns false if not sharing
    pub async fn stop_screen_share(&mut self) -> Result<bool> {
        let Some(track) = self.screen.take() else {
            return Ok(false);
        };

        if track.mark_stopped() {
            if let Err(e) = self.source.stop_track(&track).await {
                warn!("Failed to stop display capture {}: {}", track.id(), e);
            }
        }
        info!("Screen share stopped");
        Ok(true)
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// Track that peer links should send as video
    pub fn outgoing_video_track(&self) -> Option<LocalTrack> {
        self.screen
            .clone()
            .or_else(|| self.stream.as_ref().and_then(|s| s.video.clone()))
    }

    /// Re-configure the running camera for `profile` without re-acquiring it
    pub async fn apply_quality_profile(&mut self, profile: VideoProfile) -> Result<()> {
        let track = self.camera()?.clone();
        if profile == self.profile && track.constraints() == Some(profile.constraints()) {
            return Ok(());
        }

        let constraints = profile.constraints();
        self.source
            .apply_constraints(&track, &constraints)
            .await
            .map_err(|e| match e {
                Error::Constraints(_) => e,
                other => Error::Constraints(other.to_string()),
            })?;
        track.set_constraints(constraints);

        info!(
            "Video profile {} -> {} ({}x{} @ {} fps)",
            self.profile, profile, constraints.width, constraints.height, constraints.frame_rate
        );
        self.profile = profile;
        Ok(())
    }

    pub fn current_profile(&self) -> VideoProfile {
        self.profile
    }

    pub fn local_stream(&self) -> Option<LocalStream> {
        self.stream.clone()
    }

    /// Stop every live track; returns how many were stopped
    pub async fn release(&mut self) -> usize {
        let mut tracks: Vec<LocalTrack> = Vec::new();
        if let Some(stream) = self.stream.take() {
            tracks.extend(stream.tracks().cloned());
        }
        if let Some(screen) = self.screen.take() {
            tracks.push(screen);
        }
        self.released = true;

        let mut stopped = 0;
        for track in tracks {
            if !track.mark_stopped() {
                continue;
            }
            if let Err(e) = self.source.stop_track(&track).await {
                warn!("Failed to stop {:?} track {}: {}", track.source(), track.id(), e);
            }
            stopped += 1;
        }

        info!("Released local media ({} tracks stopped)", stopped);
        stopped
    }

    /// Number of local tracks still capturing
    pub fn live_track_count(&self) -> usize {
        self.stream
            .iter()
            .flat_map(|s| s.tracks())
            .chain(self.screen.iter())
            .filter(|t| t.is_live())
            .count()
    }
}

impl fmt::Debug for MediaCaptureController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaCaptureController")
            .field("profile", &self.profile)
            .field("acquired", &self.stream.is_some())
            .field("screen_sharing", &self.screen.is_some())
            .field("released", &self.released)
            .finish()
    }
}
