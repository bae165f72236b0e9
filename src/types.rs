//! Shared types used across modules
//!
//! This module contains the data model described by the pipeline: audio
//! frames, transcripts, verdicts and volume commands. Kept here to avoid
//! circular dependencies between the components that produce and consume
//! them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mono linear PCM, 16-bit little-endian, 16 kHz. Immutable after entry.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<u8>,
    pub arrived_at: DateTime<Utc>,
    pub client_id: Uuid,
}

impl AudioFrame {
    pub fn new(samples: Vec<u8>, client_id: Uuid) -> Self {
        Self {
            samples,
            arrived_at: Utc::now(),
            client_id,
        }
    }

    /// Decode into floating point samples in `[-1, 1]`. Trailing odd byte, if
    /// any, is dropped.
    pub fn to_f32_samples(&self) -> Vec<f32> {
        self.samples
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
            .collect()
    }
}

/// A speech-to-text result. Partials are forwarded to clients but never feed
/// the attention engine; only finals do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub id: Uuid,
    pub text: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    pub is_partial: bool,
    pub audio_segment_id: Uuid,
}

impl Transcript {
    pub fn new(
        text: impl Into<String>,
        confidence: f32,
        is_partial: bool,
        audio_segment_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
            is_partial,
            audio_segment_id,
        }
    }
}

/// The attention engine's classification of a final transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictKind {
    Ignore,
    ProbablyToMe,
    DefinitelyToMe,
}

impl std::fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerdictKind::Ignore => write!(f, "IGNORE"),
            VerdictKind::ProbablyToMe => write!(f, "PROBABLY_TO_ME"),
            VerdictKind::DefinitelyToMe => write!(f, "DEFINITELY_TO_ME"),
        }
    }
}

/// What drove a verdict: matched keywords/patterns, whether the LLM was
/// consulted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictExplanation {
    pub matched_keywords: Vec<String>,
    pub matched_patterns: Vec<String>,
    pub llm_consulted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionVerdict {
    pub kind: VerdictKind,
    pub confidence: f32,
    pub explanation: VerdictExplanation,
}

impl AttentionVerdict {
    pub fn new(kind: VerdictKind, confidence: f32, explanation: VerdictExplanation) -> Self {
        Self {
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            explanation,
        }
    }
}

/// A volume-control command emitted by the Dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeCommandKind {
    #[serde(rename = "LOWER_VOLUME")]
    Dim,
    #[serde(rename = "RESTORE_VOLUME")]
    Restore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCommand {
    #[serde(rename = "type")]
    pub kind: VolumeCommandKind,
    pub timestamp: DateTime<Utc>,
    pub trigger_reason: VerdictKind,
    pub confidence: f32,
}

impl VolumeCommand {
    pub fn new(kind: VolumeCommandKind, trigger_reason: VerdictKind, confidence: f32) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            trigger_reason,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Result of matching an audio frame against the voice-profile registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub is_match: bool,
    pub confidence: f32,
    pub profile_id: Option<String>,
}
