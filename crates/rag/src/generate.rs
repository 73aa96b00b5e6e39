use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use underwrite_core::{AssessError, Chunk, Result};
use underwrite_llm::{LlmClient, LlmProvider, LlmRequest, LlmSettings};

use crate::prompt::{render_context, stuff_prompt, SYSTEM_PROMPT};

/// What to do when the stuffed context exceeds `max_context_chars`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    Reject,
    /// Drop the lowest-ranked chunks until the context fits.
    Truncate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: LlmProvider,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_context_chars: usize,
    pub overflow: OverflowPolicy,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Groq,
            model: None,
            base_url: None,
            temperature: 0.0,
            max_context_chars: 24_000,
            overflow: OverflowPolicy::Reject,
            timeout_secs: 120,
        }
    }
}

impl GenerationConfig {
    pub fn model_name(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    fn settings(&self, credential: Option<&SecretString>) -> LlmSettings {
        LlmSettings {
            provider: self.provider,
            model: self.model_name(),
            base_url: self.base_url.clone(),
            api_key: credential.map(|secret| secret.expose_secret().to_string()),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Decision {
    #[serde(rename = "APPROVE")]
    Approve,
    #[serde(rename = "REJECT")]
    Reject,
    #[serde(rename = "REVIEW REQUIRED")]
    ReviewRequired,
}

impl Decision {
    const ALL: [Decision; 3] = [Decision::Approve, Decision::Reject, Decision::ReviewRequired];

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Approve => "APPROVE",
            Decision::Reject => "REJECT",
            Decision::ReviewRequired => "REVIEW REQUIRED",
        }
    }

    /// First label in the "Final Decision" section, in any case. Without
    /// that section, the first upper-case label anywhere in the narrative.
    pub fn parse(narrative: &str) -> Option<Self> {
        let lowered = narrative.to_ascii_lowercase();
        match lowered.find("final decision") {
            Some(pos) => Self::first_label(&lowered[pos..], |d| d.label().to_ascii_lowercase()),
            None => Self::first_label(narrative, |d| d.label().to_string()),
        }
    }

    fn first_label(text: &str, needle: impl Fn(&Decision) -> String) -> Option<Self> {
        Self::ALL
            .iter()
            .filter_map(|decision| text.find(&needle(decision)).map(|idx| (idx, *decision)))
            .min_by_key(|(idx, _)| *idx)
            .map(|(_, decision)| decision)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssessmentResult {
    /// Markdown as returned by the model.
    pub narrative: String,
    pub sources: Vec<Chunk>,
    pub decision: Option<Decision>,
    pub usage: TokenUsage,
}

pub struct AnswerGenerator {
    client: LlmClient,
    temperature: f32,
    max_context_chars: usize,
    overflow: OverflowPolicy,
}

impl AnswerGenerator {
    pub fn new(config: &GenerationConfig, credential: Option<&SecretString>) -> Result<Self> {
        if credential.is_none() {
            if let Some(var) = config.provider.credential_var() {
                return Err(AssessError::MissingCredential(var.to_string()));
            }
        }
        let client = LlmClient::new(config.settings(credential))
            .map_err(|e| AssessError::GenerationServiceError(format!("{e:#}")))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: LlmClient, config: &GenerationConfig) -> Self {
        Self {
            client,
            temperature: config.temperature,
            max_context_chars: config.max_context_chars,
            overflow: config.overflow,
        }
    }

    /// Apply the context budget, returning the chunks that will be sent and
    /// their rendered context.
    pub fn fit_context(&self, mut chunks: Vec<Chunk>) -> Result<(Vec<Chunk>, String)> {
        let mut context = render_context(&chunks);
        let mut actual = context.chars().count();
        if actual <= self.max_context_chars {
            return Ok((chunks, context));
        }
        let limit = self.max_context_chars;
        if self.overflow == OverflowPolicy::Reject {
            return Err(AssessError::ContextTooLarge { actual, limit });
        }
        let original = chunks.len();
        while actual > limit && chunks.len() > 1 {
            chunks.pop();
            context = render_context(&chunks);
            actual = context.chars().count();
        }
        if actual > limit {
            return Err(AssessError::ContextTooLarge { actual, limit });
        }
        warn!(
            kept = chunks.len(),
            dropped = original - chunks.len(),
            limit,
            "context truncated to fit budget"
        );
        Ok((chunks, context))
    }

    pub fn generate(&self, query: &str, chunks: Vec<Chunk>) -> Result<AssessmentResult> {
        let (sources, context) = self.fit_context(chunks)?;
        let request = LlmRequest {
            system: Some(SYSTEM_PROMPT.to_string()),
            user: stuff_prompt(query, &context),
            temperature: self.temperature,
        };
        info!(
            provider = self.client.provider().as_str(),
            model = %self.client.model(),
            chunks = sources.len(),
            context_chars = context.chars().count(),
            "requesting assessment"
        );
        let response = self
            .client
            .chat_blocking(&request)
            .map_err(|e| AssessError::GenerationServiceError(format!("{e:#}")))?;
        let decision = Decision::parse(&response.content);
        if decision.is_none() {
            warn!("narrative carries no decision label");
        }
        Ok(AssessmentResult {
            narrative: response.content,
            sources,
            decision,
            usage: TokenUsage {
                prompt_tokens: response.prompt_tokens,
                completion_tokens: response.completion_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ASSESSMENT_QUERY;
    use underwrite_core::{ChunkConfig, Chunker, SourceDocument};

    fn sample_chunks() -> Vec<Chunk> {
        Chunker::new(ChunkConfig::default())
            .unwrap()
            .split_documents(&[
                SourceDocument::new("Foundation: minor cracks.", "report.pdf", Some(1)),
                SourceDocument::new("Roof: good condition.", "report.pdf", Some(0)),
                SourceDocument::new("Rule 1: Reject if foundation cracks exceed minor.", "rules.txt", None),
            ])
    }

    fn local(max_context_chars: usize, overflow: OverflowPolicy) -> AnswerGenerator {
        let config = GenerationConfig {
            provider: LlmProvider::Local,
            max_context_chars,
            overflow,
            ..Default::default()
        };
        AnswerGenerator::new(&config, None).unwrap()
    }

    #[test]
    fn parses_final_decision_section_first() {
        let narrative = "## Compliance\nRule 1 would REJECT severe cracks.\n## Final Decision\n**APPROVE**\n";
        assert_eq!(Decision::parse(narrative), Some(Decision::Approve));
        assert_eq!(
            Decision::parse("Outcome: REVIEW REQUIRED pending inspection"),
            Some(Decision::ReviewRequired)
        );
        assert_eq!(Decision::parse("no verdict"), None);
    }

    #[test]
    fn final_decision_section_matches_any_case() {
        let narrative = "## Compliance\nThe roof alone would APPROVE.\nFoundation cracks exceed minor.\n## Final Decision\n**Reject**\n";
        assert_eq!(Decision::parse(narrative), Some(Decision::Reject));
        let narrative = "Rule 2 says APPROVE.\n### Final decision\nReview required before funding.";
        assert_eq!(Decision::parse(narrative), Some(Decision::ReviewRequired));
    }

    #[test]
    fn final_decision_section_without_label_does_not_borrow_from_discussion() {
        let narrative = "Rule 1 would REJECT severe cracks.\n## Final Decision\nPending more documents.";
        assert_eq!(Decision::parse(narrative), None);
    }

    #[test]
    fn hosted_provider_without_credential_is_rejected() {
        let err = AnswerGenerator::new(&GenerationConfig::default(), None)
            .err()
            .unwrap();
        assert!(matches!(err, AssessError::MissingCredential(ref var) if var == "GROQ_API_KEY"));
    }

    #[test]
    fn local_generation_echoes_sources() {
        let chunks = sample_chunks();
        let result = local(24_000, OverflowPolicy::Reject)
            .generate(ASSESSMENT_QUERY, chunks.clone())
            .unwrap();
        assert_eq!(result.sources, chunks);
        assert_eq!(result.decision, Some(Decision::ReviewRequired));
        assert!(result.narrative.to_lowercase().contains("foundation"));
    }

    #[test]
    fn overflow_rejects_by_default() {
        let err = local(40, OverflowPolicy::Reject)
            .generate(ASSESSMENT_QUERY, sample_chunks())
            .unwrap_err();
        assert!(matches!(err, AssessError::ContextTooLarge { limit: 40, .. }));
    }

    #[test]
    fn truncate_drops_lowest_ranked_chunks() {
        let chunks = sample_chunks();
        let budget = render_context(&chunks[..1]).chars().count();
        let (kept, context) = local(budget, OverflowPolicy::Truncate)
            .fit_context(chunks.clone())
            .unwrap();
        assert_eq!(kept, chunks[..1].to_vec());
        assert_eq!(context.chars().count(), budget);
    }

    #[test]
    fn unreachable_provider_is_a_generation_error() {
        let config = GenerationConfig {
            provider: LlmProvider::OpenAi,
            base_url: Some("http://127.0.0.1:1/v1".to_string()),
            timeout_secs: 2,
            ..Default::default()
        };
        let key = SecretString::new("sk-test".to_string());
        let generator = AnswerGenerator::new(&config, Some(&key)).unwrap();
        let err = generator.generate(ASSESSMENT_QUERY, sample_chunks()).unwrap_err();
        assert_eq!(err.code(), "generation_service_error");
    }
}
