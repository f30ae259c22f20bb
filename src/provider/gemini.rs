//! Google Gemini streaming client.
//!
//! Calls `models/{model}:streamGenerateContent?alt=sse`, which answers with an
//! SSE body whose `data:` payloads are full `GenerateContentResponse` objects.
//! The API key travels in the `x-goog-api-key` header.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ApiKey, ProviderConfig};
use crate::provider::sse::SseStream;
use crate::provider::{FragmentStream, ProviderClient, ProviderError, StreamChunk, TokenUsage};

/// Streaming client for the Gemini generative language API.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: ApiKey,
    base_url: String,
    temperature: Option<f32>,
}

impl GeminiClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
        })
    }

    /// Accepts both `gemini-2.0-flash` and the resource form `models/gemini-2.0-flash`.
    fn stream_url(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        )
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn provider_name(&self) -> &str {
        "google_genai"
    }

    async fn stream(&self, model: &str, prompt: &str) -> Result<FragmentStream, ProviderError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: self
                .temperature
                .map(|temperature| GenerationConfig { temperature }),
        };

        debug!(model, prompt_chars = prompt.len(), "Opening Gemini stream");

        let response = self
            .http
            .post(self.stream_url(model))
            .header("x-goog-api-key", self.api_key.expose())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(
                status.as_u16(),
                error_message(&text),
            ));
        }

        let events = SseStream::new(Box::pin(response.bytes_stream()));
        let chunks = events.map(|event| event.and_then(|data| parse_chunk(&data)));
        Ok(Box::pin(chunks))
    }
}

/// Decode one `data:` payload into a [`StreamChunk`].
pub fn parse_chunk(data: &str) -> Result<StreamChunk, ProviderError> {
    let response: GenerateContentResponse = serde_json::from_str(data)
        .map_err(|e| ProviderError::Decode(format!("bad chunk JSON: {e}")))?;

    if let Some(err) = response.error {
        let status = err.code.unwrap_or(500);
        return Err(ProviderError::from_status(status, err.message));
    }

    let candidate = response.candidates.into_iter().next();
    let (text, finish_reason) = match candidate {
        Some(c) => {
            let text = c
                .content
                .map(|content| {
                    content
                        .parts
                        .into_iter()
                        .filter_map(|p| p.text)
                        .collect::<String>()
                })
                .unwrap_or_default();
            (text, c.finish_reason)
        }
        None => (String::new(), None),
    };

    let usage = response.usage_metadata.map(|u| TokenUsage {
        input_tokens: u.prompt_token_count.unwrap_or(0),
        output_tokens: u.candidates_token_count.unwrap_or(0),
    });

    Ok(StreamChunk {
        text,
        done: finish_reason.is_some(),
        finish_reason,
        usage,
    })
}

/// Pull `error.message` out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => body.chars().take(512).collect(),
    }
}

// ─── Wire Types ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<u16>,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_chunk() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"Hello"},{"text":", world"}],"role":"model"}}],"modelVersion":"gemini-2.0-flash"}"#;
        let chunk = parse_chunk(data).unwrap();
        assert_eq!(chunk.text, "Hello, world");
        assert!(!chunk.done);
        assert!(chunk.usage.is_none());
    }

    #[test]
    fn test_parse_final_chunk_with_usage() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"!"}],"role":"model"},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":8,"candidatesTokenCount":21,"totalTokenCount":29}}"#;
        let chunk = parse_chunk(data).unwrap();
        assert_eq!(chunk.text, "!");
        assert!(chunk.done);
        assert_eq!(chunk.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(
            chunk.usage,
            Some(TokenUsage {
                input_tokens: 8,
                output_tokens: 21
            })
        );
    }

    #[test]
    fn test_parse_chunk_without_text() {
        let data = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let chunk = parse_chunk(data).unwrap();
        assert_eq!(chunk.text, "");
        assert!(chunk.done);
    }

    #[test]
    fn test_parse_embedded_error() {
        let data = r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        assert!(matches!(
            parse_chunk(data),
            Err(ProviderError::RateLimited(msg)) if msg == "Resource has been exhausted"
        ));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(parse_chunk("not json"), Err(ProviderError::Decode(_))));
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(error_message(body), "API key not valid.");
        assert_eq!(error_message("upstream exploded"), "upstream exploded");
    }

    #[test]
    fn test_request_body_shape() {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: "hi" }],
            }],
            generation_config: Some(GenerationConfig { temperature: 0.5 }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["generationConfig"]["temperature"], 0.5);
    }

    #[test]
    fn test_stream_url() {
        let mut config = ProviderConfig::new("k", "gemini-2.0-flash");
        config.base_url = "http://localhost:1234/".to_string();
        let client = GeminiClient::new(&config).unwrap();
        assert_eq!(
            client.stream_url("gemini-2.0-flash"),
            "http://localhost:1234/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn test_stream_url_resource_name() {
        let client = GeminiClient::new(&ProviderConfig::new("k", "models/gemini-2.0-flash")).unwrap();
        let url = client.stream_url("models/gemini-2.0-flash");
        assert!(url.ends_with("/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"));
        assert_eq!(url.matches("models/").count(), 1);
    }
}
