//! Session-scoped signaling transport
//!
//! Wraps a [`SignalingSocket`] with the consultation protocol: announce the
//! local participant on open, decode inbound frames, drop malformed ones and
//! report disconnects without ever reconnecting on its own.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::message::SignalingMessage;
use crate::socket::{SignalingSocket, SocketEvent, NORMAL_CLOSURE};

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Connection state of the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    /// Closed by the local side
    Closed,
}

/// Events delivered to the owner of the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The socket opened and the join announcement went out
    Connected,
    /// A well-formed frame arrived
    Message(SignalingMessage),
    /// The connection was lost without a local close
    Disconnected { code: u16, reason: String },
    /// The local side closed the transport
    Closed,
}

#[derive(Debug, Clone)]
struct Identity {
    session_id: String,
    participant_id: String,
    role: Option<String>,
}

/// Signaling transport for one consultation session
#[derive(Clone)]
pub struct SignalingTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    socket: Arc<dyn SignalingSocket>,
    state: watch::Sender<TransportState>,
    identity: Mutex<Option<Identity>>,
    events_tx: mpsc::Sender<TransportEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
    // Bumped on every open so a stale reader cannot report a close
    generation: AtomicU64,
}

impl SignalingTransport {
    /// Create a transport over `socket`; events arrive on the returned receiver
    pub fn new(socket: Arc<dyn SignalingSocket>) -> (Self, mpsc::Receiver<TransportEvent>) {
        Self::with_capacity(socket, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(
        socket: Arc<dyn SignalingSocket>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (state, _) = watch::channel(TransportState::Disconnected);

        let transport = Self {
            inner: Arc::new(TransportInner {
                socket,
                state,
                identity: Mutex::new(None),
                events_tx,
                reader: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        };
        (transport, events_rx)
    }

    /// Connect and announce `participant_id` in `session_id`.
    ///
    /// A call while already connecting or connected does nothing.
    pub async fn connect(&self, session_id: &str, participant_id: &str) -> Result<()> {
        self.connect_with_role(session_id, participant_id, None).await
    }

    /// Like [`connect`](Self::connect), also announcing the participant's role
    pub async fn connect_with_role(
        &self,
        session_id: &str,
        participant_id: &str,
        role: Option<&str>,
    ) -> Result<()> {
        *self.inner.identity.lock() = Some(Identity {
            session_id: session_id.to_string(),
            participant_id: participant_id.to_string(),
            role: role.map(str::to_string),
        });
        self.open().await
    }

    /// Re-open the connection with the identity of the last connect
    pub async fn reconnect(&self) -> Result<()> {
        if self.inner.identity.lock().is_none() {
            return Err(Error::NotConnected);
        }
        self.open().await
    }

    async fn open(&self) -> Result<()> {
        let mut started = false;
        self.inner.state.send_if_modified(|state| match state {
            TransportState::Connecting | TransportState::Connected => false,
            _ => {
                *state = TransportState::Connecting;
                started = true;
                true
            }
        });
        if !started {
            debug!("Signaling connect ignored, transport is {:?}", self.state());
            return Ok(());
        }

        let identity = self.inner.identity.lock().clone();
        let identity = match identity {
            Some(identity) => identity,
            None => {
                self.inner.state.send_replace(TransportState::Disconnected);
                return Err(Error::NotConnected);
            }
        };

        let socket_rx = match self.inner.socket.open(&identity.session_id, &identity.participant_id).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(session = %identity.session_id, error = %e, "Signaling connect failed");
                self.inner.state.send_replace(TransportState::Disconnected);
                return Err(e);
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.send_replace(TransportState::Connected);
        let _ = self.inner.events_tx.send(TransportEvent::Connected).await;
        self.spawn_receive_loop(socket_rx, generation);

        let join = SignalingMessage::user_joined(
            &identity.session_id,
            &identity.participant_id,
            identity.role.as_deref(),
        );
        if let Err(e) = self.send(&join).await {
            warn!("Failed to announce participant {}: {}", identity.participant_id, e);
        }

        info!(
            session = %identity.session_id,
            participant = %identity.participant_id,
            "Signaling connected"
        );
        Ok(())
    }

    fn spawn_receive_loop(&self, mut socket_rx: mpsc::Receiver<SocketEvent>, generation: u64) {
        let transport = self.clone();

        let handle = tokio::spawn(async move {
            let inner = &transport.inner;
            let mut close = None;

            while let Some(event) = socket_rx.recv().await {
                match event {
                    SocketEvent::Text(text) => match SignalingMessage::decode(&text) {
                        Ok(message) => {
                            trace!("Signaling {} from {:?}", message.kind, message.from);
                            if inner.events_tx.send(TransportEvent::Message(message)).await.is_err() {
                                debug!("Transport event receiver dropped");
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("Dropping malformed signaling frame: {}", e);
                        }
                    },
                    SocketEvent::Error(e) => {
                        warn!("Signaling socket error: {}", e);
                    }
                    SocketEvent::Closed { code, reason, clean } => {
                        debug!("Signaling socket closed (code {}, clean {})", code, clean);
                        close = Some((code, reason));
                        break;
                    }
                }
            }

            if inner.generation.load(Ordering::SeqCst) != generation {
                return;
            }

            let mut lost = false;
            inner.state.send_if_modified(|state| {
                if *state == TransportState::Connected {
                    *state = TransportState::Disconnected;
                    lost = true;
                    true
                } else {
                    false
                }
            });

            if lost {
                let (code, reason) = close.unwrap_or((1006, "socket event stream ended".to_string()));
                warn!(code, reason = %reason, "Signaling connection lost");
                let _ = inner.events_tx.send(TransportEvent::Disconnected { code, reason }).await;
            }
        });

        if let Some(previous) = self.inner.reader.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Send one frame; fails with `NotConnected` unless connected
    pub async fn send(&self, message: &SignalingMessage) -> Result<()> {
        if self.state() != TransportState::Connected {
            return Err(Error::NotConnected);
        }
        let text = message.encode()?;
        self.inner.socket.send_text(text).await
    }

    /// Close cleanly with code 1000, announcing departure first
    pub async fn close(&self, reason: &str) -> Result<()> {
        let previous = self.inner.state.send_replace(TransportState::Closed);
        if previous == TransportState::Closed {
            return Ok(());
        }

        if previous == TransportState::Connected {
            let identity = self.inner.identity.lock().clone();
            if let Some(identity) = identity {
                let leave = SignalingMessage::user_left(&identity.session_id, &identity.participant_id);
                if let Ok(text) = leave.encode() {
                    if let Err(e) = self.inner.socket.send_text(text).await {
                        debug!("Could not announce departure: {}", e);
                    }
                }
            }
        }

        let result = self.inner.socket.close(NORMAL_CLOSURE, reason).await;
        if let Some(reader) = self.inner.reader.lock().take() {
            reader.abort();
        }

        info!("Signaling closed: {}", reason);
        let _ = self.inner.events_tx.try_send(TransportEvent::Closed);
        result
    }

    pub fn state(&self) -> TransportState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }
}

impl fmt::Debug for SignalingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingTransport")
            .field("state", &self.state())
            .field("socket", &self.inner.socket)
            .finish()
    }
}
