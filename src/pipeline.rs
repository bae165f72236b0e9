//! Wires the connection hub, voice filter, transcription bridge, attention
//! engine and dispatcher into the unidirectional graph described by the
//! component design: frames flow hub -> filter -> bridge -> engine ->
//! dispatcher -> hub, with the last edge carried by [`CommandSink`] so the
//! dispatcher never calls back into the hub's own API.

use async_trait::async_trait;
use std::sync::Arc;

use crate::attention::AttentionEngine;
use crate::connection::{AudioFrameSink, ConnectionHub};
use crate::dispatcher::Dispatcher;
use crate::transcription::{TranscriptSink, TranscriptionBridge};
use crate::types::{AudioFrame, Transcript};
use crate::voice_filter::VoiceFilter;

/// Gates inbound audio on the voice filter before it reaches the
/// transcription bridge. An ignore match never opens or feeds an STT
/// session.
pub struct FrameRouter {
    pub voice_filter: Arc<VoiceFilter>,
    pub transcription: Arc<TranscriptionBridge>,
}

#[async_trait]
impl AudioFrameSink for FrameRouter {
    async fn on_frame(&self, frame: AudioFrame) {
        let result = self.voice_filter.match_frame(&frame.samples).await;
        if result.is_match {
            return;
        }
        self.transcription.submit_frame(frame.samples).await;
    }
}

/// Broadcasts every transcript to clients; routes only finals into the
/// attention engine and on to the dispatcher.
pub struct TranscriptRouter {
    pub hub: Arc<ConnectionHub>,
    pub attention: Arc<AttentionEngine>,
    pub dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl TranscriptSink for TranscriptRouter {
    async fn on_partial(&self, transcript: Transcript) {
        self.hub.broadcast_transcript(&transcript).await;
    }

    async fn on_final(&self, transcript: Transcript) {
        self.hub.broadcast_transcript(&transcript).await;
        let verdict = self.attention.classify(&transcript).await;
        self.dispatcher.handle_verdict(&verdict).await;
    }
}
