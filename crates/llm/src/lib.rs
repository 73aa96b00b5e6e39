use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tracing::debug;

/// Markers the prompt builder wraps retrieved context in; the local provider
/// reads them back.
pub const CONTEXT_START: &str = "=== CONTEXT START ===";
pub const CONTEXT_END: &str = "=== CONTEXT END ===";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Groq,
    OpenAi,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "groq",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "groq" => Some(LlmProvider::Groq),
            "openai" => Some(LlmProvider::OpenAi),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }

    /// Environment variable holding the credential, if the provider needs one.
    pub fn credential_var(&self) -> Option<&'static str> {
        match self {
            LlmProvider::Groq => Some("GROQ_API_KEY"),
            LlmProvider::OpenAi => Some("OPENAI_API_KEY"),
            LlmProvider::Local => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "llama-3.3-70b-versatile",
            LlmProvider::OpenAi => "gpt-4.1-mini",
            LlmProvider::Local => "local",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "https://api.groq.com/openai/v1",
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Local => "",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Connection settings for one client; the credential is supplied by the
/// caller rather than read from the process environment.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl LlmSettings {
    pub fn new(provider: LlmProvider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            base_url: None,
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    ChatCompletions(ChatCompletionsConfig),
    Local,
}

#[derive(Clone)]
struct ChatCompletionsConfig {
    api_key: String,
    base_url: String,
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to build http client")?;
        let config = match settings.provider {
            LlmProvider::Groq | LlmProvider::OpenAi => {
                let api_key = settings.api_key.clone().ok_or_else(|| {
                    anyhow!(
                        "{} is required for the {} provider",
                        settings.provider.credential_var().unwrap_or("api key"),
                        settings.provider.as_str()
                    )
                })?;
                ProviderConfig::ChatCompletions(ChatCompletionsConfig {
                    api_key,
                    base_url: settings
                        .base_url
                        .clone()
                        .unwrap_or_else(|| settings.provider.default_base_url().to_string()),
                })
            }
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http,
            provider: settings.provider,
            model: settings.model,
            config,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match &self.config {
            ProviderConfig::ChatCompletions(cfg) => self.chat_completions(cfg, req).await,
            ProviderConfig::Local => Ok(self.chat_local(req)),
        }
    }

    pub fn chat_blocking(&self, req: &LlmRequest) -> Result<LlmResponse> {
        let rt = Runtime::new().context("failed to create tokio runtime")?;
        rt.block_on(self.chat(req))
    }

    async fn chat_completions(
        &self,
        cfg: &ChatCompletionsConfig,
        req: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": req.user }));
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": req.temperature,
        });
        debug!(provider = self.provider.as_str(), model = %self.model, "sending chat request");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&cfg.api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("{} request failed", self.provider.as_str()))?;
        let value = decode_body(self.provider, response).await?;
        let content = extract_chat_text(&value)
            .ok_or_else(|| anyhow!("missing text in {} response", self.provider.as_str()))?;
        if content.trim().is_empty() {
            return Err(anyhow!("{} returned an empty completion", self.provider.as_str()));
        }
        let usage: ChatUsage = value
            .get("usage")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        Ok(LlmResponse {
            content,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    fn chat_local(&self, req: &LlmRequest) -> LlmResponse {
        LlmResponse {
            content: synthesize_local_assessment(&req.user),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }
}

async fn decode_body(provider: LlmProvider, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!(
            "{} returned error (status {}): {}",
            provider.as_str(),
            status,
            body
        ));
    }
    serde_json::from_str(&body)
        .with_context(|| format!("failed to decode {} response", provider.as_str()))
}

fn extract_chat_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(|text| text.to_string())
}

/// Offline stand-in for a hosted model: lists the retrieved evidence and
/// always defers the decision to a human.
fn synthesize_local_assessment(prompt: &str) -> String {
    let context = extract_context_block(prompt, CONTEXT_START, CONTEXT_END);
    let findings = collect_findings(&context, 12);
    let mut out = String::new();
    out.push_str("## Summary of Findings\n\n");
    if findings.is_empty() {
        out.push_str("- No findings were retrieved from the documents.\n");
    }
    for finding in &findings {
        out.push_str(&format!("- {finding}\n"));
    }
    out.push_str("\n## Guideline Compliance Check\n\n");
    out.push_str(
        "The offline assessor does not evaluate compliance; compare each finding above against the retrieved guidelines.\n",
    );
    out.push_str("\n## Final Decision\n\n**REVIEW REQUIRED**\n");
    out.push_str("\n## Justification\n\n");
    out.push_str("No hosted model was consulted. Retrieved evidence: ");
    if findings.is_empty() {
        out.push_str("none.");
    } else {
        out.push_str(
            &findings
                .iter()
                .take(4)
                .cloned()
                .collect::<Vec<_>>()
                .join("; "),
        );
    }
    out.push('\n');
    out
}

fn collect_findings(context: &str, max: usize) -> Vec<String> {
    let mut label: Option<&str> = None;
    let mut findings = Vec::new();
    for line in context.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(inner) = line.strip_prefix("[DOC: ").and_then(|l| l.strip_suffix(']')) {
            label = Some(inner);
            continue;
        }
        let text = summarize_text(line, 40);
        match label {
            Some(label) => findings.push(format!("{text} ({label})")),
            None => findings.push(text),
        }
        if findings.len() >= max {
            break;
        }
    }
    findings
}

fn extract_context_block(text: &str, start_marker: &str, stop_marker: &str) -> String {
    if let Some(start_idx) = text.find(start_marker) {
        let after = &text[start_idx + start_marker.len()..];
        if let Some(end_idx) = after.find(stop_marker) {
            return after[..end_idx].trim().to_string();
        }
        return after.trim().to_string();
    }
    String::new()
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

#[derive(Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}
