use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::ExplainError;
use crate::prompts::{explanation_prompt, CONNECTION_CHECK_PROMPT};

/// Token cap for the connection check; the answer itself is thrown away.
pub const CONNECTION_CHECK_MAX_TOKENS: u32 = 100;

/// Something that can turn a selected term into a short explanation.
#[async_trait]
pub trait ExplanationService: Send + Sync {
    async fn explain(&self, api_key: &str, text: &str) -> Result<String, ExplainError>;

    /// Makes one small request with `api_key` to see whether it is accepted.
    async fn check_key(&self, api_key: &str) -> Result<(), ExplainError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [RequestContent; 1],
    generation_config: &'a GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent {
    parts: [RequestPart; 1],
}

#[derive(Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    api_base: String,
    model: String,
    generation: GenerationConfig,
}

impl GeminiClient {
    pub fn new(settings: &Settings) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            http,
            api_base: settings.gemini_api_base.trim_end_matches('/').to_string(),
            model: settings.gemini_model.clone(),
            generation: GenerationConfig {
                temperature: settings.temperature,
                top_k: 1,
                top_p: 1.0,
                max_output_tokens: settings.max_output_tokens,
            },
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    /// Posts one prompt and returns the raw body of a successful answer.
    async fn generate(&self, api_key: &str, prompt: String, generation: &GenerationConfig) -> Result<String, ExplainError> {
        let body = GenerateRequest {
            contents: [RequestContent {
                parts: [RequestPart { text: prompt }],
            }],
            generation_config: generation,
        };

        // The key goes in a header so it never shows up in error URLs.
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExplainError::Network(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "generation service returned an error");
            return Err(ExplainError::from_status(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| ExplainError::Network(e.without_url()))
    }
}

#[async_trait]
impl ExplanationService for GeminiClient {
    async fn explain(&self, api_key: &str, text: &str) -> Result<String, ExplainError> {
        debug!(model = %self.model, "requesting explanation");
        let raw = self.generate(api_key, explanation_prompt(text), &self.generation).await?;
        extract_explanation(&raw)
    }

    async fn check_key(&self, api_key: &str) -> Result<(), ExplainError> {
        debug!(model = %self.model, "checking API key");
        let generation = GenerationConfig {
            max_output_tokens: CONNECTION_CHECK_MAX_TOKENS,
            ..self.generation.clone()
        };
        let raw = self
            .generate(api_key, CONNECTION_CHECK_PROMPT.to_string(), &generation)
            .await?;
        check_response(&raw)
    }
}

/// A key check only needs a candidate with content; its text is irrelevant.
fn check_response(raw: &str) -> Result<(), ExplainError> {
    let parsed: GenerateResponse =
        serde_json::from_str(raw).map_err(|e| ExplainError::Protocol(e.to_string()))?;
    match parsed.candidates.first() {
        Some(Candidate { content: Some(_) }) => Ok(()),
        _ => Err(ExplainError::Protocol("invalid response format".to_string())),
    }
}

fn extract_explanation(raw: &str) -> Result<String, ExplainError> {
    let parsed: GenerateResponse =
        serde_json::from_str(raw).map_err(|e| ExplainError::Protocol(e.to_string()))?;

    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|p| p.text)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ExplainError::Protocol("response has no candidate text".to_string()))?;

    if text.is_empty() {
        return Err(ExplainError::Protocol("candidate text is empty".to_string()));
    }
    Ok(text)
}
