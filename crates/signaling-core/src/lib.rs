//! Signaling transport for telecare consultations
//!
//! This crate carries the offer/answer and ICE candidate exchange between the
//! participants of one consultation session:
//!
//! - [`message`]: the JSON wire format (`user-joined`, `user-left`, `offer`,
//!   `answer`, `ice-candidate`)
//! - [`socket`]: the message-oriented connection abstraction
//! - [`ws`]: a WebSocket socket built on `tokio-tungstenite`
//! - [`transport`]: the session-scoped transport that announces the local
//!   participant, filters malformed frames and reports disconnects
//!
//! The transport never reconnects by itself; the owner decides when to call
//! [`SignalingTransport::reconnect`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use telecare_signaling::{Error, SignalingMessage, SignalingTransport, TransportState, WebSocketSocket};
//!
//! # tokio_test::block_on(async {
//! let socket = WebSocketSocket::new("wss://signal.example.org/ws").unwrap();
//! let (transport, _events) = SignalingTransport::new(Arc::new(socket));
//! assert_eq!(transport.state(), TransportState::Disconnected);
//!
//! // Nothing is sent before `connect`
//! let leave = SignalingMessage::user_left("consult-42", "dr-lee");
//! assert!(matches!(transport.send(&leave).await, Err(Error::NotConnected)));
//! # })
//! ```

pub mod error;
pub mod message;
pub mod socket;
pub mod transport;

#[cfg(feature = "ws")]
pub mod ws;

pub use error::{Error, Result};
pub use message::{IceCandidate, JoinInfo, SdpType, SessionDescription, SignalKind, SignalingMessage};
pub use socket::{SignalingSocket, SocketEvent, NORMAL_CLOSURE};
pub use transport::{SignalingTransport, TransportEvent, TransportState};

#[cfg(feature = "ws")]
pub use ws::WebSocketSocket;
