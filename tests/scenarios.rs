//! End-to-end scenario coverage for the assembled pipeline: a real
//! ConnectionHub, VoiceFilter, AttentionEngine, and Dispatcher wired exactly
//! as `server::build` wires them, driven through a scripted STT transport
//! instead of a live provider.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use earshot::attention::{AttentionConfig, AttentionEngine};
use earshot::connection::protocol::ServerMessage;
use earshot::connection::ConnectionHub;
use earshot::dispatcher::Dispatcher;
use earshot::pipeline::{FrameRouter, TranscriptRouter};
use earshot::resilience::{CircuitBreakerConfig, Resilience};
use earshot::transcription::stt_client::{SttEvent, SttTransport, SttTransportError};
use earshot::transcription::TranscriptionBridge;
use earshot::voice_filter::VoiceFilter;

/// A scripted STT provider: every `send` immediately echoes back one queued
/// final transcript on the event channel handed to `open`, mimicking a
/// same-burst STT round trip without any network I/O.
struct ScriptedTransport {
    events_tx: Mutex<Option<mpsc::Sender<SttEvent>>>,
    scripted_text: Mutex<Vec<String>>,
    fail_sends_remaining: AtomicU32,
}

impl ScriptedTransport {
    fn new(scripted_text: Vec<&str>, fail_sends: u32) -> Arc<Self> {
        Arc::new(Self {
            events_tx: Mutex::new(None),
            scripted_text: Mutex::new(scripted_text.into_iter().map(String::from).collect()),
            fail_sends_remaining: AtomicU32::new(fail_sends),
        })
    }
}

#[async_trait]
impl SttTransport for ScriptedTransport {
    async fn open(&self, _api_key: &str, events: mpsc::Sender<SttEvent>) -> Result<(), SttTransportError> {
        *self.events_tx.lock().await = Some(events);
        Ok(())
    }

    async fn send(&self, _frame: &[u8]) -> Result<(), SttTransportError> {
        if self.fail_sends_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_sends_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(SttTransportError::Send("simulated outage".to_string()));
        }
        let mut scripted = self.scripted_text.lock().await;
        if let Some(text) = scripted.pop() {
            if let Some(tx) = self.events_tx.lock().await.as_ref() {
                let _ = tx
                    .send(SttEvent {
                        text,
                        confidence: 0.9,
                        is_final: true,
                    })
                    .await;
            }
        }
        Ok(())
    }

    async fn close(&self) {}
}

struct Harness {
    hub: Arc<ConnectionHub>,
    dispatcher: Arc<Dispatcher>,
}

async fn build_harness(
    sensitivity: f32,
    keywords: Vec<&str>,
    silence_timeout_ms: u64,
    scripted_text: Vec<&str>,
    fail_sends: u32,
) -> Harness {
    let resilience = Resilience::new(CircuitBreakerConfig::default());
    let voice_filter = Arc::new(VoiceFilter::new(sensitivity));
    let hub = ConnectionHub::new();
    let attention = Arc::new(AttentionEngine::new(
        keywords.into_iter().map(String::from).collect(),
        AttentionConfig {
            sensitivity,
            uncertainty_threshold: 0.5,
            llm_enabled: false,
        },
        None,
        resilience.clone(),
    ));
    let dispatcher = Dispatcher::new(sensitivity, silence_timeout_ms, hub.clone());

    let transport = ScriptedTransport::new(scripted_text, fail_sends);
    let transcript_sink = Arc::new(TranscriptRouter {
        hub: hub.clone(),
        attention: attention.clone(),
        dispatcher: dispatcher.clone(),
    });
    let transcription = TranscriptionBridge::with_retry_policy(
        transport,
        transcript_sink,
        resilience,
        Duration::from_millis(20),
        5,
    );

    let frame_router = Arc::new(FrameRouter {
        voice_filter: voice_filter.clone(),
        transcription,
    });
    hub.set_frame_sink(frame_router).await;

    Harness { hub, dispatcher }
}

fn pcm_frame(len_samples: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(len_samples * 2);
    for i in 0..len_samples {
        let t = i as f32 / 16000.0;
        let sample = (t * 220.0 * std::f32::consts::TAU).sin() * 0.5;
        bytes.extend_from_slice(&((sample * 32767.0) as i16).to_le_bytes());
    }
    bytes
}

/// Scenario 1: a keyword-bearing final transcript dims immediately and
/// auto-restores after the silence timeout with no further speech.
#[tokio::test]
async fn scenario_definite_attention_dims_then_auto_restores() {
    let harness = build_harness(0.7, vec!["hey"], 80, vec!["hey there"], 0).await;
    let (client_id, mut rx) = harness.hub.register().await;

    let ack = rx.recv().await.unwrap();
    assert!(matches!(ack, ServerMessage::Ack { .. }));

    harness.hub.handle_binary_frame(client_id, pcm_frame(1024)).await;

    let mut saw_dim = false;
    let mut saw_restore = false;
    for _ in 0..4 {
        match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
            Ok(Some(ServerMessage::VolumeAction { payload, .. })) if payload.kind == "LOWER_VOLUME" => {
                saw_dim = true;
            }
            Ok(Some(ServerMessage::VolumeAction { payload, .. })) if payload.kind == "RESTORE_VOLUME" => {
                saw_restore = true;
                break;
            }
            Ok(Some(_)) => continue,
            _ => break,
        }
    }

    assert!(saw_dim, "expected a LOWER_VOLUME action for keyword-bearing speech");
    assert!(saw_restore, "expected auto-restore after the silence timeout");
}

/// Scenario 2: a pattern-only transcript under the probably-to-me threshold
/// emits nothing.
#[tokio::test]
async fn scenario_conditional_under_threshold_emits_nothing() {
    let harness = build_harness(0.4, vec![], 5000, vec!["what time is it?"], 0).await;
    let (client_id, mut rx) = harness.hub.register().await;
    rx.recv().await.unwrap(); // ack

    harness.hub.handle_binary_frame(client_id, pcm_frame(1024)).await;

    let result = tokio::time::timeout(Duration::from_millis(300), async {
        while let Some(msg) = rx.recv().await {
            if matches!(msg, ServerMessage::VolumeAction { .. }) {
                return true;
            }
        }
        false
    })
    .await;

    assert!(result.is_err() || !result.unwrap(), "no volume action should fire below threshold");
}

/// Scenario 3: a pattern-only transcript above the probably-to-me threshold
/// dims with the PROBABLY_TO_ME reason.
#[tokio::test]
async fn scenario_conditional_above_threshold_dims() {
    let harness = build_harness(0.8, vec![], 5000, vec!["can you help?"], 0).await;
    let (client_id, mut rx) = harness.hub.register().await;
    rx.recv().await.unwrap(); // ack

    harness.hub.handle_binary_frame(client_id, pcm_frame(1024)).await;

    let action = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match rx.recv().await {
                Some(ServerMessage::VolumeAction { payload, .. }) => return Some(payload),
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await
    .expect("timed out waiting for a volume action")
    .expect("channel closed without a volume action");

    assert_eq!(action.kind, "LOWER_VOLUME");
    assert_eq!(action.trigger_reason, "PROBABLY_TO_ME");
}

/// Scenario 4: a frame matching a registered ignore profile never reaches
/// transcription, so no transcript or command is produced for it.
#[tokio::test]
async fn scenario_ignore_filter_skips_transcription() {
    let resilience = Resilience::new(CircuitBreakerConfig::default());
    let voice_filter = Arc::new(VoiceFilter::new(0.7));
    let frame = pcm_frame(4096);
    voice_filter.add("p1".to_string(), &[frame.clone()], None).await.unwrap();

    let hub = ConnectionHub::new();
    let attention = Arc::new(AttentionEngine::new(
        vec!["hey".to_string()],
        AttentionConfig::default(),
        None,
        resilience.clone(),
    ));
    let dispatcher = Dispatcher::new(0.7, 5000, hub.clone());
    let transport = ScriptedTransport::new(vec!["hey there"], 0);
    let transcript_sink = Arc::new(TranscriptRouter {
        hub: hub.clone(),
        attention,
        dispatcher,
    });
    let transcription = TranscriptionBridge::with_retry_policy(
        transport,
        transcript_sink,
        resilience,
        Duration::from_millis(20),
        5,
    );
    let frame_router = Arc::new(FrameRouter {
        voice_filter: voice_filter.clone(),
        transcription,
    });
    hub.set_frame_sink(frame_router).await;

    let (client_id, mut rx) = hub.register().await;
    rx.recv().await.unwrap(); // ack

    hub.handle_binary_frame(client_id, frame).await;

    let saw_anything = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(saw_anything.is_err(), "ignored speaker's audio must produce no downstream message");
}

/// Scenario 5: an STT send failure enqueues the frame on the retry queue and
/// it drains successfully once the transport recovers.
#[tokio::test]
async fn scenario_stt_outage_then_recovery_drains_the_retry_queue() {
    let harness = build_harness(0.7, vec!["hey"], 5000, vec!["hey there"], 2).await;
    let (client_id, mut rx) = harness.hub.register().await;
    rx.recv().await.unwrap(); // ack

    harness.hub.handle_binary_frame(client_id, pcm_frame(1024)).await;

    let action = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Some(ServerMessage::VolumeAction { payload, .. }) => return Some(payload),
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await
    .expect("timed out waiting for the retried frame to produce a verdict")
    .expect("channel closed without a volume action");

    assert_eq!(action.kind, "LOWER_VOLUME");
}

/// Scenario 6 (cleanup half): termination — whether by the heartbeat sweep
/// or an explicit disconnect — removes the session from the registry exactly
/// once and a repeat disconnect is a no-op. The 30s heartbeat-timeout wait
/// itself is exercised by `connection::tests` with a shortened interval, not
/// here.
#[tokio::test]
async fn scenario_stale_client_is_unregistered() {
    let harness = build_harness(0.7, vec!["hey"], 5000, vec![], 0).await;
    let (client_id, mut rx) = harness.hub.register().await;
    rx.recv().await.unwrap(); // ack

    assert_eq!(harness.hub.active_count().await, 1);
    assert!(harness.hub.unregister(client_id).await);
    assert_eq!(harness.hub.active_count().await, 0);
    assert!(!harness.hub.unregister(client_id).await);
}
