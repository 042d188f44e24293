//! WebSocket implementation of [`SignalingSocket`]

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::socket::{SignalingSocket, SocketEvent, NORMAL_CLOSURE};

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

// Code reported when the connection ends without a close frame
const ABNORMAL_CLOSURE: u16 = 1006;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Signaling socket backed by a WebSocket connection.
///
/// The session and participant ids are appended to the base URL as the
/// `sessionId` and `userId` query parameters.
#[derive(Clone)]
pub struct WebSocketSocket {
    inner: Arc<WebSocketInner>,
}

struct WebSocketInner {
    base_url: Url,
    channel_capacity: usize,
    writer: Mutex<Option<WsSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    open: AtomicBool,
}

impl WebSocketSocket {
    /// Create a socket for the given server URL (`ws://` or `wss://`)
    pub fn new(url: &str) -> Result<Self> {
        let base_url = Url::parse(url).map_err(|e| Error::ConnectFailed(format!("invalid URL {}: {}", url, e)))?;
        match base_url.scheme() {
            "ws" | "wss" => {}
            other => return Err(Error::ConnectFailed(format!("unsupported scheme: {}", other))),
        }

        Ok(Self {
            inner: Arc::new(WebSocketInner {
                base_url,
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
                writer: Mutex::new(None),
                reader: Mutex::new(None),
                open: AtomicBool::new(false),
            }),
        })
    }

    fn session_url(&self, session_id: &str, participant_id: &str) -> Url {
        let mut url = self.inner.base_url.clone();
        url.query_pairs_mut()
            .append_pair("sessionId", session_id)
            .append_pair("userId", participant_id);
        url
    }

    fn spawn_receive_loop(
        &self,
        mut reader: futures_util::stream::SplitStream<WsStream>,
        events_tx: mpsc::Sender<SocketEvent>,
    ) -> JoinHandle<()> {
        let socket = self.clone();

        tokio::spawn(async move {
            let mut close_event = None;

            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        trace!("Received signaling frame ({} bytes)", text.len());
                        if events_tx.send(SocketEvent::Text(text)).await.is_err() {
                            debug!("Socket event receiver dropped, stopping reader");
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                            None => (1005, String::new()),
                        };
                        close_event = Some(SocketEvent::Closed {
                            code,
                            reason,
                            clean: code == NORMAL_CLOSURE,
                        });
                        break;
                    }
                    Ok(Message::Binary(data)) => {
                        warn!("Ignoring binary signaling frame ({} bytes)", data.len());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket read error: {}", e);
                        close_event = Some(SocketEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: e.to_string(),
                            clean: false,
                        });
                        break;
                    }
                }
            }

            socket.inner.open.store(false, Ordering::SeqCst);
            socket.inner.writer.lock().await.take();

            let event = close_event.unwrap_or(SocketEvent::Closed {
                code: ABNORMAL_CLOSURE,
                reason: "connection dropped".to_string(),
                clean: false,
            });
            let _ = events_tx.send(event).await;
        })
    }
}

#[async_trait]
impl SignalingSocket for WebSocketSocket {
    async fn open(&self, session_id: &str, participant_id: &str) -> Result<mpsc::Receiver<SocketEvent>> {
        let url = self.session_url(session_id, participant_id);
        debug!("Opening signaling WebSocket to {}", self.inner.base_url);

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::ConnectFailed(e.to_string()))?;
        let (writer, reader) = stream.split();

        let (events_tx, events_rx) = mpsc::channel(self.inner.channel_capacity);
        *self.inner.writer.lock().await = Some(writer);
        self.inner.open.store(true, Ordering::SeqCst);

        let handle = self.spawn_receive_loop(reader, events_tx);
        if let Some(previous) = self.inner.reader.lock().await.replace(handle) {
            previous.abort();
        }

        info!("Signaling WebSocket open for session {}", session_id);
        Ok(events_rx)
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        let sink = writer.as_mut().ok_or(Error::NotConnected)?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| Error::SendFailed(e.to_string()))
    }

    async fn close(&self, code: u16, reason: &str) -> Result<()> {
        let sink = self.inner.writer.lock().await.take();
        self.inner.open.store(false, Ordering::SeqCst);

        let Some(mut sink) = sink else {
            return Ok(());
        };

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let result = sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| Error::SendFailed(e.to_string()));
        let _ = sink.close().await;
        result
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for WebSocketSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketSocket")
            .field("url", &self.inner.base_url.as_str())
            .field("open", &self.is_open())
            .finish()
    }
}
