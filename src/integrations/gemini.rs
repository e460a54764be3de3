use crate::config::GeminiConfig;
use crate::error::PipelineError;
use crate::models::{ConversationMessage, Role};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const SERVICE: &str = "the AI service";

/// The two things the pipeline asks of a language model. Both return raw,
/// untrusted text.
pub trait LanguageModel: Send + Sync {
    fn chat(&self, turns: &[ConversationMessage]) -> Result<String, PipelineError>;

    fn describe_image(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, PipelineError>;
}

pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(5)))
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn api_key(&self) -> Result<String, PipelineError> {
        if !self.config.enabled {
            return Err(PipelineError::Config(
                "Gemini is disabled in config.".to_string(),
            ));
        }
        let key = self.config.resolve_api_key();
        if key.is_empty() {
            return Err(PipelineError::Config(
                "Error: API Key missing. Please check your configuration.".to_string(),
            ));
        }
        Ok(key)
    }

    fn generate(&self, model: &str, contents: Value) -> Result<String, PipelineError> {
        let api_key = self.api_key()?;
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            normalize_model_name(model)
        );
        let body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.config.temperature.clamp(0.0, 1.0),
                "maxOutputTokens": self.config.max_output_tokens.max(64),
            }
        });

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .map_err(|e| PipelineError::upstream(SERVICE, format!("Gemini request failed: {e}")))?;
        let status = response.status();
        let body_text = response.text().map_err(|e| {
            PipelineError::upstream(SERVICE, format!("Gemini response read failed: {e}"))
        })?;
        if !status.is_success() {
            return Err(PipelineError::upstream(
                SERVICE,
                format!("Gemini error ({status}): {}", truncate_error(&body_text)),
            ));
        }

        extract_text(&body_text)
    }
}

impl LanguageModel for GeminiClient {
    fn chat(&self, turns: &[ConversationMessage]) -> Result<String, PipelineError> {
        let contents: Vec<Value> = turns
            .iter()
            .map(|turn| {
                json!({
                    "role": gemini_role(turn.role),
                    "parts": [{"text": turn.text}]
                })
            })
            .collect();
        self.generate(&self.config.model, Value::Array(contents))
    }

    fn describe_image(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, PipelineError> {
        let contents = json!([
            {
                "role": "user",
                "parts": [
                    {"text": prompt},
                    {"inline_data": {"mime_type": mime_type, "data": BASE64.encode(image)}}
                ]
            }
        ]);
        let model = if self.config.vision_model.trim().is_empty() {
            self.config.model.as_str()
        } else {
            self.config.vision_model.as_str()
        };
        self.generate(model, contents)
    }
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

fn extract_text(body: &str) -> Result<String, PipelineError> {
    let parsed: GeminiResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::upstream(SERVICE, format!("Gemini parse failed: {e}")))?;
    parsed
        .candidates
        .iter()
        .filter_map(|candidate| candidate.content.as_ref())
        .flat_map(|content| content.parts.iter())
        .filter_map(|part| part.text.as_ref())
        .find(|text| !text.trim().is_empty())
        .map(|text| text.trim().to_string())
        .ok_or_else(|| PipelineError::upstream(SERVICE, "Gemini returned empty response."))
}

fn normalize_model_name(model: &str) -> String {
    let trimmed = model.trim();
    let stripped = trimmed.strip_prefix("models/").unwrap_or(trimmed);
    match stripped {
        "" => "gemini-2.5-flash".to_string(),
        "gemini-flash" => "gemini-2.5-flash".to_string(),
        "gemini-pro" => "gemini-2.5-pro".to_string(),
        other => other.to_string(),
    }
}

fn truncate_error(message: &str) -> String {
    let mut out = message.trim().replace(['\n', '\r'], " ");
    if out.chars().count() > 240 {
        out = out.chars().take(240).collect();
        out.push_str("...");
    }
    out
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}
