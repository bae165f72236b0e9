//! Voice-signature ignore filter.
//!
//! Extracts a lightweight 128-dimensional fingerprint from an audio frame
//! and matches it against a registry of known-ignored speakers. A match
//! means "skip transcription for this frame" further down the pipeline.

mod features;

pub use features::extract_fingerprint;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::MatchResult;

pub const FINGERPRINT_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum VoiceFilterError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A registered speaker whose audio should be ignored by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub id: String,
    pub name: Option<String>,
    pub signature: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub match_count: u64,
}

/// In-memory registry of voice profiles plus the current sensitivity used
/// for matching. Serializable as a whole for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    sensitivity: f32,
    profiles: Vec<VoiceProfile>,
}

pub struct VoiceFilter {
    profiles: RwLock<HashMap<String, VoiceProfile>>,
    sensitivity: RwLock<f32>,
}

impl VoiceFilter {
    pub fn new(sensitivity: f32) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            sensitivity: RwLock::new(sensitivity),
        }
    }

    pub async fn set_sensitivity(&self, sensitivity: f32) {
        *self.sensitivity.write().await = sensitivity.clamp(0.0, 1.0);
    }

    pub async fn sensitivity(&self) -> f32 {
        *self.sensitivity.read().await
    }

    /// Train and register a new profile from one or more PCM training
    /// frames. Fails with `InvalidInput` if `frames` is empty or `id` is
    /// already registered.
    pub async fn add(
        &self,
        id: String,
        frames: &[Vec<u8>],
        name: Option<String>,
    ) -> Result<VoiceProfile, VoiceFilterError> {
        if frames.is_empty() {
            return Err(VoiceFilterError::InvalidInput(
                "at least one training frame is required".to_string(),
            ));
        }
        let mut profiles = self.profiles.write().await;
        if profiles.contains_key(&id) {
            return Err(VoiceFilterError::InvalidInput(format!(
                "profile id '{id}' already exists"
            )));
        }

        let vectors: Vec<[f32; FINGERPRINT_LEN]> = frames
            .iter()
            .map(|frame| extract_fingerprint(frame))
            .collect();
        let signature = average_and_normalize(&vectors);

        let profile = VoiceProfile {
            id: id.clone(),
            name,
            signature,
            created_at: Utc::now(),
            last_used_at: None,
            match_count: 0,
        };
        profiles.insert(id, profile.clone());
        Ok(profile)
    }

    /// Removes a profile. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        self.profiles.write().await.remove(id).is_some()
    }

    pub async fn list(&self) -> Vec<VoiceProfile> {
        self.profiles.read().await.values().cloned().collect()
    }

    pub async fn rename(&self, id: &str, name: String) -> bool {
        if let Some(profile) = self.profiles.write().await.get_mut(id) {
            profile.name = Some(name);
            true
        } else {
            false
        }
    }

    /// Matches a raw PCM frame against every registered profile; the
    /// winning profile is the argmax over similarity. On a match, bumps the
    /// winner's usage counters.
    pub async fn match_frame(&self, frame: &[u8]) -> MatchResult {
        let sensitivity = self.sensitivity().await;
        let fingerprint = extract_fingerprint(frame);

        let mut best: Option<(String, f32)> = None;
        {
            let profiles = self.profiles.read().await;
            for profile in profiles.values() {
                let sim = cosine_similarity_unit(&fingerprint, &profile.signature);
                if best.as_ref().map(|(_, s)| sim > *s).unwrap_or(true) {
                    best = Some((profile.id.clone(), sim));
                }
            }
        }

        match best {
            Some((id, sim)) if sim >= sensitivity => {
                if let Some(profile) = self.profiles.write().await.get_mut(&id) {
                    profile.match_count += 1;
                    profile.last_used_at = Some(Utc::now());
                }
                MatchResult {
                    is_match: true,
                    confidence: sim,
                    profile_id: Some(id),
                }
            }
            Some((_, sim)) => MatchResult {
                is_match: false,
                confidence: sim,
                profile_id: None,
            },
            None => MatchResult {
                is_match: false,
                confidence: 0.0,
                profile_id: None,
            },
        }
    }

    /// Serializes profiles and sensitivity to JSON for persistence.
    pub async fn to_json(&self) -> Result<String, serde_json::Error> {
        let state = PersistedState {
            sensitivity: self.sensitivity().await,
            profiles: self.list().await,
        };
        serde_json::to_string_pretty(&state)
    }

    /// Replaces in-memory state from a previously saved JSON document.
    pub async fn load_from_json(&self, json: &str) -> Result<(), serde_json::Error> {
        let state: PersistedState = serde_json::from_str(json)?;
        *self.sensitivity.write().await = state.sensitivity;
        let mut profiles = self.profiles.write().await;
        profiles.clear();
        for profile in state.profiles {
            profiles.insert(profile.id.clone(), profile);
        }
        Ok(())
    }
}

fn average_and_normalize(vectors: &[[f32; FINGERPRINT_LEN]]) -> Vec<f32> {
    let mut sum = [0f32; FINGERPRINT_LEN];
    for v in vectors {
        for i in 0..FINGERPRINT_LEN {
            sum[i] += v[i];
        }
    }
    let n = vectors.len() as f32;
    for x in sum.iter_mut() {
        *x /= n;
    }
    l2_normalize(&sum)
}

fn l2_normalize(v: &[f32; FINGERPRINT_LEN]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < 1e-12 {
        return vec![0.0; FINGERPRINT_LEN];
    }
    v.iter().map(|x| x / norm).collect()
}

/// Cosine similarity between two vectors, remapped from `[-1,1]` to `[0,1]`.
pub fn cosine_similarity_unit(a: &[f32; FINGERPRINT_LEN], b: &[f32]) -> f32 {
    if b.len() != FINGERPRINT_LEN {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a < 1e-12 || norm_b < 1e-12 {
        return 0.5;
    }
    let cos = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn tone_frame(freq_hz: f32, len_samples: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(len_samples * 2);
        for i in 0..len_samples {
            let t = i as f32 / 16000.0;
            let sample = (t * freq_hz * std::f32::consts::TAU).sin() * 0.5;
            let i16_sample = (sample * 32767.0) as i16;
            bytes.extend_from_slice(&i16_sample.to_le_bytes());
        }
        bytes
    }

    #[tokio::test]
    async fn add_empty_frames_is_invalid_input() {
        let filter = VoiceFilter::new(0.7);
        let result = filter.add("p1".to_string(), &[], None).await;
        assert!(matches!(result, Err(VoiceFilterError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn profile_round_trip() {
        let filter = VoiceFilter::new(0.7);
        let frame = tone_frame(220.0, 4096);
        let profile = filter
            .add("p1".to_string(), &[frame], Some("Alex".to_string()))
            .await
            .unwrap();
        assert_eq!(profile.match_count, 0);

        let norm: f32 = profile.signature.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm != 0.0 {
            assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-3);
        }

        let listed = filter.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "p1");

        assert!(filter.remove("p1").await);
        assert!(!filter.remove("p1").await);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let filter = VoiceFilter::new(0.7);
        let frame = tone_frame(220.0, 4096);
        filter
            .add("p1".to_string(), &[frame.clone()], None)
            .await
            .unwrap();
        let result = filter.add("p1".to_string(), &[frame], None).await;
        assert!(matches!(result, Err(VoiceFilterError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn matching_frame_is_recognized() {
        let filter = VoiceFilter::new(0.5);
        let frame = tone_frame(220.0, 4096);
        filter.add("p1".to_string(), &[frame.clone()], None).await.unwrap();

        let result = filter.match_frame(&frame).await;
        assert!(result.is_match);
        assert_eq!(result.profile_id.as_deref(), Some("p1"));

        let listed = filter.list().await;
        assert_eq!(listed[0].match_count, 1);
    }

    #[tokio::test]
    async fn sensitivity_is_monotonic_in_match() {
        let frame = tone_frame(220.0, 4096);
        let filter = VoiceFilter::new(0.99);
        filter.add("p1".to_string(), &[frame.clone()], None).await.unwrap();
        let strict = filter.match_frame(&frame).await;

        filter.set_sensitivity(0.0).await;
        let lenient = filter.match_frame(&frame).await;

        assert!(lenient.confidence >= strict.confidence - 1e-6);
        if strict.is_match {
            assert!(lenient.is_match);
        }
    }
}
