//! Client-connection lifecycle: registry, per-session audio buffering, and
//! the heartbeat/liveness sweep.

pub mod protocol;
pub mod ws;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::AbortHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatcher::CommandSink;
use crate::types::{AudioFrame, VolumeCommand};
use protocol::ServerMessage;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);
const AUDIO_BUFFER_CAPACITY: usize = 100;
const SEND_CHANNEL_CAPACITY: usize = 64;

/// Published on connect/disconnect for observers (the control API, tests).
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected(Uuid),
    Disconnected(Uuid),
}

/// Downstream consumer of raw PCM frames as they arrive. The hub's own job
/// ends at buffering and publishing; the pipeline wiring lives in whoever
/// implements this.
#[async_trait]
pub trait AudioFrameSink: Send + Sync {
    async fn on_frame(&self, frame: AudioFrame);
}

struct ClientHandle {
    send_tx: mpsc::Sender<ServerMessage>,
    audio_buffer: tokio::sync::Mutex<VecDeque<AudioFrame>>,
    alive: AtomicBool,
    last_heartbeat: tokio::sync::Mutex<DateTime<Utc>>,
    reader_task: tokio::sync::Mutex<Option<AbortHandle>>,
    overflow_warned: AtomicBool,
}

pub struct ConnectionHub {
    sessions: RwLock<HashMap<Uuid, Arc<ClientHandle>>>,
    /// Set once via [`Self::set_frame_sink`] after the rest of the pipeline
    /// is wired up, breaking what would otherwise be a construction cycle
    /// (hub -> frame sink -> transcription bridge -> transcript sink -> hub).
    frame_sink: RwLock<Option<Arc<dyn AudioFrameSink>>>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
}

impl ConnectionHub {
    pub fn new() -> Arc<Self> {
        Self::with_heartbeat(HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT)
    }

    /// As [`Self::new`] but with overridden heartbeat timings, so tests don't
    /// have to wait through the production 10s/30s schedule.
    pub fn with_heartbeat(interval: Duration, timeout: Duration) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(128);
        let hub = Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            frame_sink: RwLock::new(None),
            events_tx,
            heartbeat_interval: interval,
            heartbeat_timeout: timeout,
        });
        hub.clone().spawn_heartbeat_sweep();
        hub
    }

    /// Wires the downstream consumer of frame-arrived events. Must be
    /// called before the server starts accepting connections.
    pub async fn set_frame_sink(&self, sink: Arc<dyn AudioFrameSink>) {
        *self.frame_sink.write().await = Some(sink);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Registers a new session, delivering the `ack` message immediately.
    /// `reader_task` is aborted when the session is terminated by the
    /// heartbeat sweep (it is owned by the caller's read loop otherwise).
    pub async fn register(self: &Arc<Self>) -> (Uuid, mpsc::Receiver<ServerMessage>) {
        let id = Uuid::new_v4();
        let (send_tx, send_rx) = mpsc::channel(SEND_CHANNEL_CAPACITY);
        let handle = Arc::new(ClientHandle {
            send_tx,
            audio_buffer: tokio::sync::Mutex::new(VecDeque::with_capacity(AUDIO_BUFFER_CAPACITY)),
            alive: AtomicBool::new(true),
            last_heartbeat: tokio::sync::Mutex::new(Utc::now()),
            reader_task: tokio::sync::Mutex::new(None),
            overflow_warned: AtomicBool::new(false),
        });
        self.sessions.write().await.insert(id, handle.clone());
        self.send_to(id, ServerMessage::ack(id)).await;
        let _ = self.events_tx.send(ConnectionEvent::Connected(id));
        info!(client_id = %id, "client connected");
        (id, send_rx)
    }

    /// Stores the read-loop task's abort handle so the heartbeat sweep can
    /// terminate it on stale-timeout without taking ownership of the task.
    pub async fn attach_reader_task(&self, id: Uuid, abort_handle: AbortHandle) {
        if let Some(handle) = self.sessions.read().await.get(&id) {
            *handle.reader_task.lock().await = Some(abort_handle);
        }
    }

    /// Terminates a session: aborts its reader task, drains the audio
    /// buffer, closes the send queue, and publishes a disconnected event.
    /// Returns whether the session existed.
    pub async fn unregister(&self, id: Uuid) -> bool {
        let handle = self.sessions.write().await.remove(&id);
        match handle {
            Some(handle) => {
                if let Some(abort_handle) = handle.reader_task.lock().await.take() {
                    abort_handle.abort();
                }
                handle.audio_buffer.lock().await.clear();
                let _ = self.events_tx.send(ConnectionEvent::Disconnected(id));
                info!(client_id = %id, "client disconnected");
                true
            }
            None => false,
        }
    }

    /// Enqueues a raw PCM binary frame on the session's bounded buffer
    /// (drop-oldest on overflow) and publishes it downstream.
    pub async fn handle_binary_frame(&self, id: Uuid, bytes: Vec<u8>) {
        let handle = self.sessions.read().await.get(&id).cloned();
        let Some(handle) = handle else { return };

        let frame = AudioFrame::new(bytes, id);
        {
            let mut buffer = handle.audio_buffer.lock().await;
            if buffer.len() >= AUDIO_BUFFER_CAPACITY {
                buffer.pop_front();
                if !handle.overflow_warned.swap(true, Ordering::SeqCst) {
                    warn!(client_id = %id, "audio buffer overflow, dropping oldest frame");
                }
            } else {
                handle.overflow_warned.store(false, Ordering::SeqCst);
            }
            buffer.push_back(frame.clone());
        }
        let sink = self.frame_sink.read().await.clone();
        if let Some(sink) = sink {
            sink.on_frame(frame).await;
        }
    }

    /// A heartbeat control message (or protocol pong) refreshes liveness.
    pub async fn handle_heartbeat(&self, id: Uuid) {
        if let Some(handle) = self.sessions.read().await.get(&id) {
            handle.alive.store(true, Ordering::SeqCst);
            *handle.last_heartbeat.lock().await = Utc::now();
            self.send_to(id, ServerMessage::heartbeat()).await;
        }
    }

    /// Best-effort delivery: drops and does not block the pipeline if the
    /// socket isn't writable.
    async fn send_to(&self, id: Uuid, message: ServerMessage) {
        let handle = self.sessions.read().await.get(&id).cloned();
        if let Some(handle) = handle {
            if handle.send_tx.try_send(message).is_err() {
                warn!(client_id = %id, "dropping message, send queue full or closed");
            }
        }
    }

    pub async fn broadcast_transcript(&self, transcript: &crate::types::Transcript) {
        let ids: Vec<Uuid> = self.sessions.read().await.keys().copied().collect();
        for id in ids {
            self.send_to(id, ServerMessage::transcript(transcript)).await;
        }
    }

    fn spawn_heartbeat_sweep(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.heartbeat_interval);
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        });
    }

    async fn sweep_once(&self) {
        let entries: Vec<(Uuid, Arc<ClientHandle>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();

        for (id, handle) in entries {
            let stale_by_timeout = {
                let last = *handle.last_heartbeat.lock().await;
                Utc::now().signed_duration_since(last).to_std().unwrap_or(Duration::ZERO)
                    > self.heartbeat_timeout
            };
            if stale_by_timeout {
                self.unregister(id).await;
                continue;
            }

            if !handle.alive.load(Ordering::SeqCst) {
                self.unregister(id).await;
                continue;
            }

            handle.alive.store(false, Ordering::SeqCst);
            self.send_to(id, ServerMessage::heartbeat()).await;
        }
    }
}

/// Lets the Dispatcher deliver volume commands without ever calling back
/// into the hub beyond this single trait — the feedback edge stays
/// unidirectional.
#[async_trait]
impl CommandSink for ConnectionHub {
    async fn send(&self, command: VolumeCommand) {
        let ids: Vec<Uuid> = self.sessions.read().await.keys().copied().collect();
        for id in ids {
            self.send_to(id, ServerMessage::volume_action(id, &command)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_delivers_ack_immediately() {
        let hub = ConnectionHub::new();
        let start = std::time::Instant::now();
        let (client_id, mut rx) = hub.register().await;

        let msg = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("ack should arrive within 500ms")
            .expect("channel should not be closed");
        assert!(start.elapsed() < Duration::from_millis(500));
        match msg {
            ServerMessage::Ack { payload, .. } => assert_eq!(payload.client_id, client_id),
            other => panic!("expected an ack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn binary_frames_are_forwarded_in_order_with_matching_sizes() {
        struct Recorder {
            sizes: tokio::sync::Mutex<Vec<usize>>,
        }
        #[async_trait]
        impl AudioFrameSink for Recorder {
            async fn on_frame(&self, frame: AudioFrame) {
                self.sizes.lock().await.push(frame.samples.len());
            }
        }

        let hub = ConnectionHub::new();
        let recorder = Arc::new(Recorder {
            sizes: tokio::sync::Mutex::new(Vec::new()),
        });
        hub.set_frame_sink(recorder.clone()).await;

        let (client_id, _rx) = hub.register().await;
        let sizes = [10, 20, 30, 15];
        for &size in &sizes {
            hub.handle_binary_frame(client_id, vec![0u8; size]).await;
        }

        assert_eq!(*recorder.sizes.lock().await, sizes.to_vec());
    }

    #[tokio::test]
    async fn disconnect_fires_exactly_one_event_and_clears_the_registry() {
        let hub = ConnectionHub::new();
        let mut events = hub.subscribe_events();
        let (client_id, _rx) = hub.register().await;
        let _ = events.recv().await.unwrap(); // Connected

        assert_eq!(hub.active_count().await, 1);
        assert!(hub.unregister(client_id).await);
        assert_eq!(hub.active_count().await, 0);

        match events.recv().await.unwrap() {
            ConnectionEvent::Disconnected(id) => assert_eq!(id, client_id),
            other => panic!("expected Disconnected, got {other:?}"),
        }
        assert!(!hub.unregister(client_id).await);
    }

    #[tokio::test]
    async fn a_client_that_stops_heartbeating_is_terminated_within_its_timeout() {
        let hub = ConnectionHub::with_heartbeat(Duration::from_millis(20), Duration::from_millis(60));
        let (client_id, _rx) = hub.register().await;
        assert_eq!(hub.active_count().await, 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(hub.active_count().await, 0, "stale client should have been swept");
        let _ = client_id;
    }

    #[tokio::test]
    async fn a_responsive_client_survives_past_its_timeout_window() {
        let hub = ConnectionHub::with_heartbeat(Duration::from_millis(20), Duration::from_millis(80));
        let (client_id, _rx) = hub.register().await;

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            hub.handle_heartbeat(client_id).await;
        }

        assert_eq!(hub.active_count().await, 1);
    }
}
