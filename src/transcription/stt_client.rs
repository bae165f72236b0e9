//! Transport to the external streaming speech-to-text service.
//!
//! The wire shape is intentionally narrow per the documented contract: a
//! streaming session carrying linear-PCM 16 kHz mono, producing event
//! records with `{transcript.text, confidence, is_final}`. The bridge does
//! not depend on anything else the provider sends.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Error)]
pub enum SttTransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("not connected")]
    NotConnected,
}

#[derive(Debug, Clone)]
pub struct SttEvent {
    pub text: String,
    pub confidence: f32,
    pub is_final: bool,
}

#[derive(Debug, Deserialize)]
struct RawTranscriptField {
    text: String,
}

#[derive(Debug, Deserialize)]
struct RawSttEvent {
    transcript: RawTranscriptField,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    is_final: bool,
}

/// Abstracts the external STT connection so the bridge's state machine and
/// retry logic can be exercised without a live provider.
#[async_trait]
pub trait SttTransport: Send + Sync {
    /// Opens a new streaming session. Events are delivered on `events` until
    /// the session closes.
    async fn open(&self, api_key: &str, events: mpsc::Sender<SttEvent>) -> Result<(), SttTransportError>;

    /// Sends one raw PCM16 LE frame on the current session.
    async fn send(&self, frame: &[u8]) -> Result<(), SttTransportError>;

    /// Closes the current session, if any.
    async fn close(&self);
}

/// WebSocket-backed transport. Registers the event reader task *before* the
/// handshake completes so no events from the provider can be missed between
/// connect and subscribe.
pub struct WebSocketSttTransport {
    endpoint: String,
    sink: Mutex<Option<futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >>>,
}

impl WebSocketSttTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            sink: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SttTransport for WebSocketSttTransport {
    async fn open(&self, api_key: &str, events: mpsc::Sender<SttEvent>) -> Result<(), SttTransportError> {
        let url = format!("{}?token={}", self.endpoint, api_key);
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|err| SttTransportError::Connect(err.to_string()))?;
        let (write, mut read) = stream.split();
        *self.sink.lock().await = Some(write);

        // Spawn the reader before any frame is sent so an early provider
        // response is never dropped on the floor.
        tokio::spawn(async move {
            while let Some(Ok(msg)) = read.next().await {
                if let Message::Text(text) = msg {
                    if let Ok(raw) = serde_json::from_str::<RawSttEvent>(&text) {
                        let event = SttEvent {
                            text: raw.transcript.text,
                            confidence: raw.confidence,
                            is_final: raw.is_final,
                        };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), SttTransportError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(SttTransportError::NotConnected)?;
        sink.send(Message::Binary(frame.to_vec().into()))
            .await
            .map_err(|err| SttTransportError::Send(err.to_string()))
    }

    async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }
}
