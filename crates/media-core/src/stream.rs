use uuid::Uuid;

use crate::track::LocalTrack;

/// Camera and microphone tracks captured together
#[derive(Debug, Clone)]
pub struct LocalStream {
    pub id: String,
    pub audio: Option<LocalTrack>,
    pub video: Option<LocalTrack>,
}

impl LocalStream {
    pub fn new(audio: Option<LocalTrack>, video: Option<LocalTrack>) -> Self {
        Self { id: Uuid::new_v4().to_string(), audio, video }
    }

    pub fn tracks(&self) -> impl Iterator<Item = &LocalTrack> {
        self.audio.iter().chain(self.video.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}
