use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::INFERENCE_TIMEOUT_SECS;
use crate::llm::image::ImagePayload;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("http error: {0}")]
    Http(String),
    #[error("model returned HTTP {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Prompt plus optional image for one inference.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub prompt: String,
    pub image: Option<ImagePayload>,
}

/// Opaque text-completion channel: instructions in, free text out.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError>;
}

pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> crate::error::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(INFERENCE_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        let model = self.config.model.trim_start_matches("models/");
        format!(
            "{}/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let body = GenerateRequest::from_request(request);

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(InferenceError::Status(response.status().as_u16()));
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        payload
            .text()
            .ok_or_else(|| InferenceError::InvalidResponse("missing text".into()))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

impl GenerateRequest {
    fn from_request(request: &InferenceRequest) -> Self {
        let mut parts = Vec::with_capacity(2);
        if let Some(image) = &request.image {
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime_type.clone(),
                    data: BASE64.encode(&image.data),
                },
            });
        }
        parts.push(Part::Text {
            text: request.prompt.clone(),
        });

        Self {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                candidate_count: 1,
                max_output_tokens: 50,
                temperature: 0.1,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    #[serde(rename_all = "camelCase")]
    InlineData { inline_data: InlineData },
    Text { text: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    candidate_count: u32,
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Text of the first candidate, all text parts joined.
    fn text(self) -> Option<String> {
        let candidate = self.candidates.into_iter().next()?;
        let text: String = candidate
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        Some(text)
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_puts_image_before_prompt() {
        let req = InferenceRequest {
            prompt: "price this".to_string(),
            image: Some(ImagePayload {
                mime_type: "image/png".to_string(),
                data: b"hello".to_vec(),
            }),
        };
        let json = serde_json::to_value(GenerateRequest::from_request(&req)).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["inlineData"]["data"], "aGVsbG8=");
        assert_eq!(parts[1]["text"], "price this");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 50);
    }

    #[test]
    fn text_only_request_has_one_part() {
        let req = InferenceRequest {
            prompt: "p".to_string(),
            image: None,
        };
        let json = serde_json::to_value(GenerateRequest::from_request(&req)).unwrap();
        assert_eq!(json["contents"][0]["parts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn response_text_joins_parts_of_first_candidate() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"$12"},{"text":".50"}]}},{"content":{"parts":[{"text":"$1"}]}}]}"#;
        let resp: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.text().as_deref(), Some("$12.50"));

        let blocked: GenerateResponse = serde_json::from_str(r#"{"promptFeedback":{}}"#).unwrap();
        assert_eq!(blocked.text(), None);
    }

    #[test]
    fn endpoint_accepts_prefixed_model_names() {
        let client = GeminiClient::new(GeminiConfig {
            api_url: "https://example.test/v1beta/".to_string(),
            api_key: "k".to_string(),
            model: "models/gemini-2.0-flash-lite".to_string(),
        })
        .unwrap();
        assert_eq!(
            client.endpoint(),
            "https://example.test/v1beta/models/gemini-2.0-flash-lite:generateContent"
        );
    }

    async fn serve(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn client(api_url: String) -> GeminiClient {
        GeminiClient::new(GeminiConfig {
            api_url,
            api_key: "test-key".to_string(),
            model: "gemini-2.0-flash-lite".to_string(),
        })
        .unwrap()
    }

    fn request() -> InferenceRequest {
        InferenceRequest {
            prompt: "price this".to_string(),
            image: None,
        }
    }

    #[tokio::test]
    async fn complete_maps_each_failure_to_its_error() {
        use axum::http::StatusCode;
        use axum::routing::post;

        let app = axum::Router::new()
            .route(
                "/down/models/:call",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "overloaded") }),
            )
            .route(
                "/blocked/models/:call",
                post(|| async { axum::Json(serde_json::json!({"promptFeedback": {"blockReason": "OTHER"}})) }),
            )
            .route("/html/models/:call", post(|| async { "<html>oops</html>" }));
        let base = serve(app).await;

        let down = client(format!("{base}/down")).complete(&request()).await;
        assert!(matches!(down, Err(InferenceError::Status(500))), "{down:?}");

        let blocked = client(format!("{base}/blocked")).complete(&request()).await;
        assert!(matches!(blocked, Err(InferenceError::InvalidResponse(_))), "{blocked:?}");

        let html = client(format!("{base}/html")).complete(&request()).await;
        assert!(matches!(html, Err(InferenceError::InvalidResponse(_))), "{html:?}");

        let refused = client("http://127.0.0.1:1".to_string()).complete(&request()).await;
        assert!(matches!(refused, Err(InferenceError::Http(_))), "{refused:?}");
    }

    #[tokio::test]
    async fn complete_sends_key_and_returns_text() {
        use axum::http::HeaderMap;
        use axum::routing::post;

        let app = axum::Router::new().route(
            "/models/:call",
            post(|headers: HeaderMap| async move {
                let keyed = headers.get("x-goog-api-key").is_some_and(|v| v == "test-key");
                let text = if keyed { "$18.75" } else { "missing key" };
                axum::Json(serde_json::json!({
                    "candidates": [{"content": {"parts": [{"text": text}]}}]
                }))
            }),
        );
        let base = serve(app).await;

        let text = client(base).complete(&request()).await.unwrap();
        assert_eq!(text, "$18.75");
    }
}
