//! Attention-detection decision engine.
//!
//! Classifies a final transcript as `IGNORE`, `PROBABLY_TO_ME` or
//! `DEFINITELY_TO_ME` using, in order: a keyword match, a pattern match, a
//! rule-based uncertainty score, and — only when that score is low and the
//! LLM fallback is enabled and reachable — a call to the external LLM. The
//! engine never returns an error to its caller; any LLM failure silently
//! degrades to the rule-based result.

mod patterns;

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::llm::LlmClient;
use crate::resilience::{Resilience, ResilienceError};
use crate::types::{AttentionVerdict, Transcript, VerdictExplanation, VerdictKind};

const CONTEXT_WINDOW: usize = 10;
const LLM_CONTEXT_LINES: usize = 5;
const LLM_OPERATION: &str = "llm";

#[derive(Debug, Clone)]
pub struct AttentionConfig {
    pub sensitivity: f32,
    pub uncertainty_threshold: f32,
    pub llm_enabled: bool,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            sensitivity: 0.7,
            uncertainty_threshold: 0.5,
            llm_enabled: false,
        }
    }
}

pub struct AttentionEngine {
    keywords: RwLock<Vec<String>>,
    user_name: RwLock<Option<String>>,
    config: RwLock<AttentionConfig>,
    context: RwLock<VecDeque<String>>,
    llm: Option<Arc<LlmClient>>,
    resilience: Arc<Resilience>,
}

impl AttentionEngine {
    pub fn new(
        keywords: Vec<String>,
        config: AttentionConfig,
        llm: Option<Arc<LlmClient>>,
        resilience: Arc<Resilience>,
    ) -> Self {
        Self {
            keywords: RwLock::new(keywords.into_iter().map(normalize_keyword).collect()),
            user_name: RwLock::new(None),
            config: RwLock::new(config),
            context: RwLock::new(VecDeque::with_capacity(CONTEXT_WINDOW)),
            llm,
            resilience,
        }
    }

    pub async fn add_keyword(&self, keyword: String) {
        let normalized = normalize_keyword(keyword);
        let mut keywords = self.keywords.write().await;
        if !keywords.contains(&normalized) {
            keywords.push(normalized);
        }
    }

    pub async fn remove_keyword(&self, keyword: &str) {
        let normalized = normalize_keyword(keyword.to_string());
        self.keywords.write().await.retain(|k| k != &normalized);
    }

    pub async fn set_user_name(&self, name: Option<String>) {
        *self.user_name.write().await = name;
    }

    pub async fn set_sensitivity(&self, sensitivity: f32) {
        self.config.write().await.sensitivity = sensitivity.clamp(0.0, 1.0);
    }

    pub async fn set_uncertainty_threshold(&self, threshold: f32) {
        self.config.write().await.uncertainty_threshold = threshold.clamp(0.0, 1.0);
    }

    pub async fn enable_llm(&self) {
        self.config.write().await.llm_enabled = true;
    }

    pub async fn disable_llm(&self) {
        self.config.write().await.llm_enabled = false;
    }

    /// Classifies a *final* transcript. Partial transcripts must never be
    /// passed here.
    pub async fn classify(&self, transcript: &Transcript) -> AttentionVerdict {
        let text = transcript.text.trim();
        let lower = text.to_lowercase();

        // Context buffer is append-only and feeds only the LLM prompt; it is
        // updated regardless of which decision step resolves the verdict.
        self.push_context(text).await;

        if let Some(verdict) = self.keyword_match(&lower).await {
            return verdict;
        }

        if let Some(verdict) = self.pattern_match(text).await {
            return verdict;
        }

        let rule_confidence = rule_based_confidence(text);
        let config = self.config.read().await.clone();

        if rule_confidence < config.uncertainty_threshold && config.llm_enabled && self.llm.is_some() {
            if let Some(verdict) = self.llm_fallback(text, &config).await {
                return verdict;
            }
        }

        AttentionVerdict::new(
            VerdictKind::Ignore,
            (1.0 - rule_confidence).clamp(0.0, 1.0),
            VerdictExplanation::default(),
        )
    }

    async fn keyword_match(&self, lower_text: &str) -> Option<AttentionVerdict> {
        let keywords = self.keywords.read().await;
        let user_name = self.user_name.read().await;

        let mut matched = Vec::new();
        for keyword in keywords.iter() {
            if lower_text.contains(keyword.as_str()) {
                matched.push(keyword.clone());
            }
        }
        if let Some(name) = user_name.as_ref() {
            let normalized = normalize_keyword(name.clone());
            if !normalized.is_empty() && lower_text.contains(normalized.as_str()) {
                matched.push(normalized);
            }
        }

        if matched.is_empty() {
            return None;
        }

        Some(AttentionVerdict::new(
            VerdictKind::DefinitelyToMe,
            0.95,
            VerdictExplanation {
                matched_keywords: matched,
                matched_patterns: Vec::new(),
                llm_consulted: false,
            },
        ))
    }

    async fn pattern_match(&self, text: &str) -> Option<AttentionVerdict> {
        let mut matched = patterns::matching_question_patterns(text);
        matched.extend(patterns::matching_direct_address_patterns(text));
        if matched.is_empty() {
            return None;
        }
        Some(AttentionVerdict::new(
            VerdictKind::ProbablyToMe,
            0.7,
            VerdictExplanation {
                matched_keywords: Vec::new(),
                matched_patterns: matched,
                llm_consulted: false,
            },
        ))
    }

    async fn llm_fallback(&self, text: &str, config: &AttentionConfig) -> Option<AttentionVerdict> {
        let llm = self.llm.as_ref()?;
        let prompt = self.build_prompt(text).await;

        let call_result = self
            .resilience
            .call(LLM_OPERATION, || {
                let llm = llm.clone();
                let prompt = prompt.clone();
                async move { llm.classify(prompt).await }
            })
            .await;

        let verdict = match call_result {
            Ok(v) => v,
            Err(ResilienceError::CircuitOpen(_)) => {
                warn!("llm fallback skipped: circuit open");
                return None;
            }
            Err(ResilienceError::Inner(err)) => {
                warn!(error = %err, "llm fallback failed, falling back to rule-based result");
                return None;
            }
        };

        let adjusted = (verdict.confidence * config.sensitivity).clamp(0.0, 1.0);
        let kind = if adjusted >= 0.8 {
            VerdictKind::DefinitelyToMe
        } else if adjusted >= 0.5 {
            VerdictKind::ProbablyToMe
        } else {
            VerdictKind::Ignore
        };

        Some(AttentionVerdict::new(
            kind,
            adjusted,
            VerdictExplanation {
                matched_keywords: Vec::new(),
                matched_patterns: Vec::new(),
                llm_consulted: true,
            },
        ))
    }

    async fn push_context(&self, text: &str) {
        let mut context = self.context.write().await;
        if context.len() == CONTEXT_WINDOW {
            context.pop_front();
        }
        context.push_back(text.to_string());
    }

    async fn build_prompt(&self, text: &str) -> String {
        let context = self.context.read().await;
        let history: Vec<&String> = context
            .iter()
            .rev()
            .skip(1)
            .take(LLM_CONTEXT_LINES)
            .collect();
        let mut lines: Vec<String> = history.into_iter().rev().cloned().collect();
        lines.push(text.to_string());
        format!(
            "Determine whether the final line of this transcript is directed at the listener. \
             Respond with JSON {{\"directed\": bool, \"confidence\": 0..1, \"reason\": string}}.\n\n{}",
            lines.join("\n")
        )
    }
}

fn normalize_keyword(keyword: String) -> String {
    keyword.trim().to_lowercase()
}

/// Soft-signal confidence used to decide whether to consult the LLM, and as
/// the IGNORE confidence when it isn't consulted.
fn rule_based_confidence(text: &str) -> f32 {
    let mut confidence = 0.0f32;
    if text.trim_end().ends_with('?') {
        confidence += 0.2;
    }
    let lower = text.to_lowercase();
    if lower.contains("you") {
        confidence += 0.15;
    }
    if lower.contains("your") {
        confidence += 0.1;
    }
    if text.len() < 50 {
        confidence += 0.1;
    }
    if text.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
        confidence += 0.05;
    }
    confidence.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn transcript(text: &str) -> Transcript {
        Transcript::new(text, 0.9, false, Uuid::new_v4())
    }

    fn engine() -> AttentionEngine {
        let resilience = Resilience::new(Default::default());
        AttentionEngine::new(
            vec!["hey".to_string(), "hello".to_string()],
            AttentionConfig::default(),
            None,
            resilience,
        )
    }

    #[tokio::test]
    async fn keyword_bearing_text_is_definitely_to_me() {
        let engine = engine();
        let verdict = engine.classify(&transcript("hey there, got a sec?")).await;
        assert_eq!(verdict.kind, VerdictKind::DefinitelyToMe);
        assert!((verdict.confidence - 0.95).abs() < 1e-6);
    }

    #[tokio::test]
    async fn pattern_only_text_is_probably_to_me() {
        let engine = engine();
        let verdict = engine.classify(&transcript("can you help me with this?")).await;
        assert_eq!(verdict.kind, VerdictKind::ProbablyToMe);
    }

    #[tokio::test]
    async fn indicator_free_text_is_ignored() {
        let engine = engine();
        let verdict = engine
            .classify(&transcript("the quarterly numbers look fine"))
            .await;
        assert_eq!(verdict.kind, VerdictKind::Ignore);
    }

    #[tokio::test]
    async fn llm_disabled_never_consults_llm() {
        let engine = engine();
        let verdict = engine.classify(&transcript("hmm")).await;
        assert!(!verdict.explanation.llm_consulted);
    }

    #[tokio::test]
    async fn user_name_behaves_like_a_keyword() {
        let engine = engine();
        engine.set_user_name(Some("Dana".to_string())).await;
        let verdict = engine.classify(&transcript("Dana, can I ask something")).await;
        assert_eq!(verdict.kind, VerdictKind::DefinitelyToMe);
    }
}
