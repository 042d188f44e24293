//! Local and remote media track handles

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::profile::VideoConstraints;

/// Unique identifier of a local track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Device a local track is captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl TrackSource {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }
}

/// Shared handle to a captured track.
///
/// Clones refer to the same track. Peer links and the UI read the handle;
/// only the capture controller changes its enabled flag, constraints or
/// liveness.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<TrackInner>,
}

struct TrackInner {
    id: TrackId,
    source: TrackSource,
    label: String,
    enabled: AtomicBool,
    live: AtomicBool,
    constraints: RwLock<Option<VideoConstraints>>,
}

impl LocalTrack {
    /// Wrap a freshly captured device track
    pub fn new(source: TrackSource, label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: TrackId::new(),
                source,
                label: label.into(),
                enabled: AtomicBool::new(true),
                live: AtomicBool::new(true),
                constraints: RwLock::new(None),
            }),
        }
    }

    pub fn id(&self) -> TrackId {
        self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.source.kind()
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// False once the track has been stopped
    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn constraints(&self) -> Option<VideoConstraints> {
        *self.inner.constraints.read()
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn set_constraints(&self, constraints: VideoConstraints) {
        *self.inner.constraints.write() = Some(constraints);
    }

    /// Mark the track ended; returns false if it already was
    pub(crate) fn mark_stopped(&self) -> bool {
        self.inner.live.swap(false, Ordering::SeqCst)
    }
}

impl PartialEq for LocalTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for LocalTrack {}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("label", &self.inner.label)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Track received from a remote participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub stream_id: Option<String>,
}
