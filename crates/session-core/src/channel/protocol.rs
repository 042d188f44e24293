use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::message::ChannelMessage;
use crate::error::{Result, SessionError};
use crate::peer::DataChannelLink;
use crate::types::ParticipantId;

/// How a message was handed off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to an open channel
    Sent,
    /// Buffered until the channel opens
    Queued,
}

#[derive(Default)]
struct ChannelSlot {
    channel: Option<Arc<dyn DataChannelLink>>,
    open: bool,
    pending: VecDeque<String>,
}

/// Per-participant data channels with a pre-open send queue
pub struct DataChannelProtocol {
    label: String,
    pending_limit: usize,
    slots: HashMap<ParticipantId, ChannelSlot>,
}

impl DataChannelProtocol {
    pub fn new(label: impl Into<String>, pending_limit: usize) -> Self {
        Self {
            label: label.into(),
            pending_limit,
            slots: HashMap::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Bind the participant's channel, flushing queued messages if it is open.
    ///
    /// Channels with a different label are ignored and `false` is returned.
    pub async fn attach(&mut self, participant: &ParticipantId, channel: Arc<dyn DataChannelLink>) -> bool {
        if channel.label() != self.label {
            warn!("Ignoring data channel '{}' from {}", channel.label(), participant);
            return false;
        }

        let already_open = channel.is_open();
        let slot = self.slots.entry(participant.clone()).or_default();
        if let Some(previous) = slot.channel.replace(channel) {
            previous.close().await;
        }
        slot.open = false;
        debug!("Data channel bound for {}", participant);

        if already_open {
            self.mark_open(participant).await;
        }
        true
    }

    /// The channel reported open; send everything queued in order
    pub async fn mark_open(&mut self, participant: &ParticipantId) {
        let Some(slot) = self.slots.get_mut(participant) else {
            return;
        };
        let Some(channel) = slot.channel.clone() else {
            return;
        };
        slot.open = true;

        let queued = slot.pending.len();
        while let Some(text) = slot.pending.pop_front() {
            if let Err(e) = channel.send_text(&text).await {
                warn!("Flush to {} stopped: {}", participant, e);
                slot.pending.push_front(text);
                return;
            }
        }
        if queued > 0 {
            info!("Flushed {} queued messages to {}", queued, participant);
        }
    }

    /// The channel closed; later sends queue again until a new channel opens
    pub fn mark_closed(&mut self, participant: &ParticipantId) {
        if let Some(slot) = self.slots.get_mut(participant) {
            slot.open = false;
            slot.channel = None;
        }
    }

    pub fn is_open(&self, participant: &ParticipantId) -> bool {
        self.slots.get(participant).map_or(false, |slot| slot.open)
    }

    pub fn pending_count(&self, participant: &ParticipantId) -> usize {
        self.slots.get(participant).map_or(0, |slot| slot.pending.len())
    }

    /// Send to one participant, queueing while the channel is not open
    pub async fn send(&mut self, participant: &ParticipantId, message: &ChannelMessage) -> Result<Delivery> {
        let text = message.encode()?;
        let limit = self.pending_limit;
        let slot = self.slots.entry(participant.clone()).or_default();

        if slot.open {
            if let Some(channel) = slot.channel.clone() {
                return match channel.send_text(&text).await {
                    Ok(()) => Ok(Delivery::Sent),
                    Err(e) => {
                        warn!("Data channel send to {} failed: {}", participant, e);
                        Err(SessionError::ChannelUnavailable { participant_id: participant.to_string() })
                    }
                };
            }
        }

        if slot.pending.len() >= limit {
            return Err(SessionError::ChannelUnavailable { participant_id: participant.to_string() });
        }
        slot.pending.push_back(text);
        debug!("Queued message for {} ({} pending)", participant, slot.pending.len());
        Ok(Delivery::Queued)
    }

    /// Send to every listed participant; returns how many accepted it
    pub async fn broadcast(&mut self, participants: &[ParticipantId], message: &ChannelMessage) -> usize {
        let mut accepted = 0;
        for participant in participants {
            match self.send(participant, message).await {
                Ok(_) => accepted += 1,
                Err(e) => warn!("Broadcast to {} failed: {}", participant, e),
            }
        }
        accepted
    }

    /// Drop the participant's channel and queue
    pub async fn detach(&mut self, participant: &ParticipantId) {
        if let Some(slot) = self.slots.remove(participant) {
            if !slot.pending.is_empty() {
                debug!("Discarding {} queued messages for {}", slot.pending.len(), participant);
            }
            if let Some(channel) = slot.channel {
                channel.close().await;
            }
        }
    }

    pub async fn close_all(&mut self) {
        let participants: Vec<ParticipantId> = self.slots.keys().cloned().collect();
        for participant in participants {
            self.detach(&participant).await;
        }
    }
}

impl std::fmt::Debug for DataChannelProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataChannelProtocol")
            .field("label", &self.label)
            .field("channels", &self.slots.len())
            .finish()
    }
}
