use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Sampling parameters sent with every generation request.
/// Fixed at construction time; callers cannot tune them per request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 8192,
        }
    }
}

/// Failure of the upstream model call: non-2xx status, transport error or timeout
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("upstream model request failed{}: {message}", status_suffix(.status))]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub message: String,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {}", s)).unwrap_or_default()
}

impl UpstreamError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(Some(status.as_u16()), body)
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let timed_out = err.is_timeout();
        // Request URLs may carry credentials
        let err = err.without_url();
        let message = if timed_out {
            format!("request timed out: {}", err)
        } else {
            err.to_string()
        };
        Self::new(status, message)
    }
}

/// Prompt-in, text-out capability the quiz pipeline depends on
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, UpstreamError>;

    fn generator_name(&self) -> &str {
        "unknown"
    }
}

/// Reads the text out of a binary document (PDF, DOCX, image)
#[async_trait]
pub trait DocumentTextExtractor: Send + Sync {
    async fn extract_text(&self, instruction: &str, mime_type: &str, bytes: &[u8]) -> Result<String, UpstreamError>;
}

/// Common message structure for LLM requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMMessage {
    pub role: String,
    pub content: String,
}

/// Enum-based LLM provider implementation
#[derive(Debug, Clone)]
pub enum LLMProvider {
    OpenAI(OpenAIProvider),
    Gemini(GeminiProvider),
}

impl LLMProvider {
    /// Get the provider name for logging
    pub fn provider_name(&self) -> &'static str {
        match self {
            LLMProvider::OpenAI(provider) => provider.provider_name(),
            LLMProvider::Gemini(provider) => provider.provider_name(),
        }
    }

    /// Get the model name being used
    pub fn model_name(&self) -> &str {
        match self {
            LLMProvider::OpenAI(provider) => provider.model_name(),
            LLMProvider::Gemini(provider) => provider.model_name(),
        }
    }
}

#[async_trait]
impl TextGenerator for LLMProvider {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, UpstreamError> {
        match self {
            LLMProvider::OpenAI(provider) => provider.make_request(prompt, params).await,
            LLMProvider::Gemini(provider) => provider.make_request(prompt, params).await,
        }
    }

    fn generator_name(&self) -> &str {
        self.provider_name()
    }
}

#[async_trait]
impl DocumentTextExtractor for LLMProvider {
    async fn extract_text(&self, instruction: &str, mime_type: &str, bytes: &[u8]) -> Result<String, UpstreamError> {
        match self {
            LLMProvider::Gemini(provider) => provider.extract_document_text(instruction, mime_type, bytes).await,
            LLMProvider::OpenAI(_) => Err(UpstreamError::new(
                None,
                format!("document extraction for '{}' is not supported by the OpenAI provider", mime_type),
            )),
        }
    }
}

fn build_client(timeout: Duration) -> Result<Client, UpstreamError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| UpstreamError::new(None, format!("failed to build HTTP client: {}", e)))
}

/// OpenAI provider implementation
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<LLMMessage>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIChoice {
    message: LLMMessage,
}

impl OpenAIProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
        })
    }

    pub async fn make_request(&self, prompt: &str, params: &GenerationParams) -> Result<String, UpstreamError> {
        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![LLMMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_output_tokens,
        };

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Making LLM request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = self.provider_name(),
                status = %status,
                error = %error_text,
                "LLM API request failed"
            );
            return Err(UpstreamError::from_status(status, error_text));
        }

        let openai_response: OpenAIResponse = response.json().await?;

        let response_content = openai_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| UpstreamError::new(None, "No choices in OpenAI response"))?;

        info!(
            provider = self.provider_name(),
            response_length = response_content.len(),
            "Successfully received LLM response"
        );

        Ok(response_content)
    }

    pub fn provider_name(&self) -> &'static str {
        "OpenAI"
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

/// Gemini provider implementation
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

impl From<&GenerationParams> for GeminiGenerationConfig {
    fn from(params: &GenerationParams) -> Self {
        Self {
            temperature: params.temperature,
            top_k: params.top_k,
            top_p: params.top_p,
            max_output_tokens: params.max_output_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "promptFeedback", default, skip_serializing_if = "Option::is_none")]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPromptFeedback {
    #[serde(rename = "blockReason", default, skip_serializing_if = "Option::is_none")]
    block_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

impl GeminiResponse {
    /// Text of the first candidate; a candidate without text is an empty reply.
    /// A blocked prompt or a reply with no candidates at all is an upstream failure.
    fn into_text(self) -> Result<String, UpstreamError> {
        if let Some(reason) = self.prompt_feedback.and_then(|feedback| feedback.block_reason) {
            return Err(UpstreamError::new(None, format!("prompt blocked by model: {}", reason)));
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| UpstreamError::new(None, "No candidates in Gemini response"))?;

        Ok(candidate
            .content
            .parts
            .into_iter()
            .find_map(|part| part.text)
            .unwrap_or_default())
    }
}

impl GeminiProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model: model.unwrap_or_else(|| "gemini-2.0-flash-exp".to_string()),
        })
    }

    pub async fn make_request(&self, prompt: &str, params: &GenerationParams) -> Result<String, UpstreamError> {
        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: Some(prompt.to_string()),
                    inline_data: None,
                }],
            }],
            generation_config: Some(params.into()),
        };

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Making LLM request"
        );

        self.send(&request_body).await
    }

    pub async fn extract_document_text(&self, instruction: &str, mime_type: &str, bytes: &[u8]) -> Result<String, UpstreamError> {
        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart {
                        text: Some(instruction.to_string()),
                        inline_data: None,
                    },
                    GeminiPart {
                        text: None,
                        inline_data: Some(GeminiInlineData {
                            mime_type: mime_type.to_string(),
                            data: BASE64.encode(bytes),
                        }),
                    },
                ],
            }],
            generation_config: None,
        };

        info!(
            provider = self.provider_name(),
            model = %self.model,
            mime_type = %mime_type,
            document_bytes = bytes.len(),
            "Making document extraction request"
        );

        self.send(&request_body).await
    }

    async fn send(&self, request_body: &GeminiRequest) -> Result<String, UpstreamError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = self.provider_name(),
                status = %status,
                error = %error_text,
                "LLM API request failed"
            );
            return Err(UpstreamError::from_status(status, error_text));
        }

        let gemini_response: GeminiResponse = response.json().await?;

        let response_content = match gemini_response.into_text() {
            Ok(text) => text,
            Err(e) => {
                error!(provider = self.provider_name(), error = %e, "LLM returned no usable candidate");
                return Err(e);
            }
        };
        info!(
            provider = self.provider_name(),
            response_length = response_content.len(),
            "Successfully received LLM response"
        );

        Ok(response_content)
    }

    pub fn provider_name(&self) -> &'static str {
        "Gemini"
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum LLMProviderType {
    OpenAI,
    Gemini,
}

impl LLMProviderType {
    /// Parse a provider name from configuration; unknown names fall back to Gemini
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "openai" | "chatgpt" | "gpt" => LLMProviderType::OpenAI,
            "gemini" | "google" => LLMProviderType::Gemini,
            _ => {
                info!("Unknown LLM provider '{}', defaulting to Gemini", name);
                LLMProviderType::Gemini
            }
        }
    }
}

/// Factory for creating LLM providers based on provider type
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    pub fn create_provider(
        provider_type: LLMProviderType,
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<LLMProvider, UpstreamError> {
        Ok(match provider_type {
            LLMProviderType::OpenAI => LLMProvider::OpenAI(OpenAIProvider::new(api_key, base_url, model, timeout)?),
            LLMProviderType::Gemini => LLMProvider::Gemini(GeminiProvider::new(api_key, base_url, model, timeout)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        let test_cases = vec![
            ("openai", LLMProviderType::OpenAI),
            ("ChatGPT", LLMProviderType::OpenAI),
            ("gpt", LLMProviderType::OpenAI),
            ("gemini", LLMProviderType::Gemini),
            ("GOOGLE", LLMProviderType::Gemini),
            ("mistral", LLMProviderType::Gemini),
            ("", LLMProviderType::Gemini),
        ];

        for (input, expected) in test_cases {
            assert_eq!(LLMProviderType::parse(input), expected, "Input '{}' should map to {:?}", input, expected);
        }
    }

    #[test]
    fn test_factory_defaults() {
        let gemini = LLMProviderFactory::create_provider(
            LLMProviderType::Gemini,
            "key".to_string(),
            None,
            None,
            DEFAULT_TIMEOUT,
        )
        .unwrap();
        assert_eq!(gemini.provider_name(), "Gemini");
        assert_eq!(gemini.model_name(), "gemini-2.0-flash-exp");

        let openai = LLMProviderFactory::create_provider(
            LLMProviderType::OpenAI,
            "key".to_string(),
            None,
            Some("gpt-4o".to_string()),
            DEFAULT_TIMEOUT,
        )
        .unwrap();
        assert_eq!(openai.provider_name(), "OpenAI");
        assert_eq!(openai.model_name(), "gpt-4o");
    }

    #[test]
    fn test_gemini_request_serialization() {
        let params = GenerationParams::default();
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: Some("hello".to_string()),
                    inline_data: None,
                }],
            }],
            generation_config: Some((&params).into()),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert!(json["contents"][0]["parts"][0].get("inline_data").is_none());
        assert_eq!(json["generationConfig"]["topK"], 40);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 8192);
    }

    #[test]
    fn test_gemini_response_text() {
        let response: GeminiResponse = serde_json::from_str(r#"{"candidates":[{"content":{"parts":[]}}]}"#).unwrap();
        assert_eq!(response.into_text(), Ok(String::new()));

        let response: GeminiResponse =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[{"text":"quiz"}]}}]}"#).unwrap();
        assert_eq!(response.into_text(), Ok("quiz".to_string()));
    }

    #[test]
    fn test_gemini_blocked_prompt_is_upstream_error() {
        let response: GeminiResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        let err = response.into_text().unwrap_err();
        assert_eq!(err.status, None);
        assert!(err.message.contains("SAFETY"), "unexpected message: {}", err.message);

        let response: GeminiResponse = serde_json::from_str(r#"{}"#).unwrap();
        let err = response.into_text().unwrap_err();
        assert!(err.message.contains("No candidates"));
    }

    #[tokio::test]
    async fn test_transport_error_does_not_expose_api_key() {
        let api_key = "SECRET-API-KEY-123";
        let provider = GeminiProvider::new(
            api_key.to_string(),
            Some("http://127.0.0.1:1".to_string()),
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        let err = provider
            .make_request("hello", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(!err.message.contains(api_key), "key leaked: {}", err.message);
        assert!(!err.to_string().contains(api_key));
    }

    #[tokio::test]
    async fn test_client_timeout_is_applied() {
        // Accepts the connection but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let provider = OpenAIProvider::new(
            "key".to_string(),
            Some(base_url),
            None,
            Duration::from_millis(200),
        )
        .unwrap();

        let err = provider
            .make_request("hello", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(err.message.starts_with("request timed out"), "unexpected message: {}", err.message);
        drop(listener);
    }

    #[test]
    fn test_upstream_error_display() {
        let err = UpstreamError::from_status(StatusCode::TOO_MANY_REQUESTS, "quota exceeded");
        assert_eq!(err.status, Some(429));
        assert_eq!(err.to_string(), "upstream model request failed with status 429: quota exceeded");

        let err = UpstreamError::new(None, "connection refused");
        assert_eq!(err.to_string(), "upstream model request failed: connection refused");
    }
}
