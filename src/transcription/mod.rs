//! External streaming-transcription bridge: connection lifecycle, retry
//! queue, and the circuit breaker guarding the provider.

pub mod stt_client;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{info, warn};
use uuid::Uuid;

use crate::resilience::{Resilience, ResilienceError};
use crate::types::Transcript;
use stt_client::{SttEvent, SttTransport};

const RETRY_QUEUE_CAPACITY: usize = 100;
const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRIES: u32 = 5;
const STT_OPERATION: &str = "stt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Receives the partial/final transcripts the bridge produces. Implemented
/// by the connection hub (broadcast to clients) and the attention engine
/// (finals only) in production.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn on_partial(&self, transcript: Transcript);
    async fn on_final(&self, transcript: Transcript);
}

struct QueueItem {
    frame: Vec<u8>,
    retry_count: u32,
}

struct Inner {
    state: BridgeState,
    segment_id: Uuid,
}

pub struct TranscriptionBridge {
    inner: Mutex<Inner>,
    queue: Mutex<VecDeque<QueueItem>>,
    queue_notify: Notify,
    transport: Arc<dyn SttTransport>,
    sink: Arc<dyn TranscriptSink>,
    resilience: Arc<Resilience>,
    api_key: Mutex<Option<String>>,
    base_retry_delay: Duration,
    max_retries: u32,
}

impl TranscriptionBridge {
    pub fn new(
        transport: Arc<dyn SttTransport>,
        sink: Arc<dyn TranscriptSink>,
        resilience: Arc<Resilience>,
    ) -> Arc<Self> {
        Self::with_retry_policy(transport, sink, resilience, BASE_RETRY_DELAY, MAX_RETRIES)
    }

    /// As [`Self::new`] but with an overridden retry base delay/cap, mainly
    /// so tests don't have to wait through the production backoff schedule.
    pub fn with_retry_policy(
        transport: Arc<dyn SttTransport>,
        sink: Arc<dyn TranscriptSink>,
        resilience: Arc<Resilience>,
        base_retry_delay: Duration,
        max_retries: u32,
    ) -> Arc<Self> {
        let bridge = Arc::new(Self {
            inner: Mutex::new(Inner {
                state: BridgeState::Idle,
                segment_id: Uuid::new_v4(),
            }),
            queue: Mutex::new(VecDeque::new()),
            queue_notify: Notify::new(),
            transport,
            sink,
            resilience,
            api_key: Mutex::new(None),
            base_retry_delay,
            max_retries,
        });
        bridge.clone().spawn_retry_worker();
        bridge
    }

    pub async fn set_api_key(&self, key: Option<String>) {
        *self.api_key.lock().await = key;
    }

    pub async fn state(&self) -> BridgeState {
        self.inner.lock().await.state
    }

    pub async fn current_segment_id(&self) -> Uuid {
        self.inner.lock().await.segment_id
    }

    /// Forwards a frame to the STT session, opening it lazily on first call
    /// (or first call since the last close). Frames that can't be sent
    /// immediately land on the retry queue.
    pub async fn submit_frame(self: &Arc<Self>, frame: Vec<u8>) {
        let needs_connect = {
            let inner = self.inner.lock().await;
            matches!(inner.state, BridgeState::Idle | BridgeState::Closed)
        };
        if needs_connect {
            self.clone().connect().await;
        }

        let connected = self.inner.lock().await.state == BridgeState::Connected;
        if connected {
            match self.transport.send(&frame).await {
                Ok(()) => {
                    self.resilience.record_success(STT_OPERATION).await;
                }
                Err(err) => {
                    warn!(error = %err, "stt send failed, enqueuing for retry");
                    self.resilience.record_failure(STT_OPERATION, err.to_string()).await;
                    self.enqueue(frame).await;
                }
            }
        } else {
            self.enqueue(frame).await;
        }
    }

    async fn enqueue(&self, frame: Vec<u8>) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= RETRY_QUEUE_CAPACITY {
            queue.pop_front();
            warn!("stt retry queue overflow, dropped oldest frame");
        }
        queue.push_back(QueueItem { frame, retry_count: 0 });
        drop(queue);
        self.queue_notify.notify_one();
    }

    async fn connect(self: Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == BridgeState::Connecting {
                return;
            }
            inner.state = BridgeState::Connecting;
            inner.segment_id = Uuid::new_v4();
        }

        let api_key = self.api_key.lock().await.clone().unwrap_or_default();
        let (events_tx, mut events_rx) = mpsc::channel::<SttEvent>(64);

        let open_result = self
            .resilience
            .call(STT_OPERATION, || {
                let transport = self.transport.clone();
                let api_key = api_key.clone();
                let events_tx = events_tx.clone();
                async move { transport.open(&api_key, events_tx).await }
            })
            .await;

        match open_result {
            Ok(()) => {
                self.inner.lock().await.state = BridgeState::Connected;
                info!("stt session connected");
            }
            Err(ResilienceError::CircuitOpen(_)) => {
                warn!("stt connect skipped: circuit open");
                self.inner.lock().await.state = BridgeState::Idle;
                return;
            }
            Err(ResilienceError::Inner(err)) => {
                warn!(error = %err, "stt connect failed");
                self.inner.lock().await.state = BridgeState::Idle;
                return;
            }
        }

        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                this.handle_event(event).await;
            }
            // Provider closed the stream; informational only. The next
            // inbound frame re-enters CONNECTING.
            let mut inner = this.inner.lock().await;
            if inner.state != BridgeState::Closing {
                inner.state = BridgeState::Closed;
            } else {
                inner.state = BridgeState::Idle;
            }
        });
    }

    async fn handle_event(&self, event: SttEvent) {
        let text = event.text.trim();
        if text.is_empty() {
            return;
        }
        let segment_id = self.current_segment_id().await;
        let transcript = Transcript::new(text, event.confidence, !event.is_final, segment_id);
        if event.is_final {
            self.sink.on_final(transcript).await;
        } else {
            self.sink.on_partial(transcript).await;
        }
    }

    /// Closes the current session. The stream is shared across clients for
    /// one listener; only the server shutdown path should call this.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == BridgeState::Connected || inner.state == BridgeState::Connecting {
            inner.state = BridgeState::Closing;
            drop(inner);
            self.transport.close().await;
            self.inner.lock().await.state = BridgeState::Closed;
        }
    }

    fn spawn_retry_worker(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let item = {
                    let mut queue = self.queue.lock().await;
                    queue.pop_front()
                };
                let Some(item) = item else {
                    self.queue_notify.notified().await;
                    continue;
                };

                let delay = self.base_retry_delay * 2u32.pow(item.retry_count);
                tokio::time::sleep(delay).await;

                let connected = self.inner.lock().await.state == BridgeState::Connected;
                if !connected {
                    self.requeue_or_discard(item).await;
                    continue;
                }

                match self.transport.send(&item.frame).await {
                    Ok(()) => {
                        self.resilience.record_success(STT_OPERATION).await;
                    }
                    Err(err) => {
                        warn!(error = %err, retry_count = item.retry_count, "stt retry send failed");
                        self.resilience
                            .record_failure(STT_OPERATION, err.to_string())
                            .await;
                        self.requeue_or_discard(item).await;
                    }
                }
            }
        });
    }

    async fn requeue_or_discard(&self, mut item: QueueItem) {
        item.retry_count += 1;
        if item.retry_count >= self.max_retries {
            warn!("stt segment discarded after exceeding max retries");
            return;
        }
        self.queue.lock().await.push_back(item);
        self.queue_notify.notify_one();
    }
}
