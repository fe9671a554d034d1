//! Chat-completion client for an OpenAI-compatible endpoint.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{retryable_status, PipelineError, PipelineResult};

#[derive(Debug, Clone, Default)]
pub struct LlmUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LlmCallOutput {
    pub model: String,
    pub content: String,
    pub usage: LlmUsage,
    pub latency_ms: u64,
}

#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ChatClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub async fn chat_completion(
        &self,
        model: &str,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
        timeout: Duration,
    ) -> PipelineResult<LlmCallOutput> {
        let start = Instant::now();

        // The tiers always pin temperature and max_tokens and always
        // demand a JSON object, so the request body carries no optionals.
        let req = ChatRequest {
            model,
            messages: vec![
                RoleContent {
                    role: "system",
                    content: system,
                },
                RoleContent {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(timeout)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    PipelineError::TransientProvider {
                        provider: "llm".into(),
                        message: e.to_string(),
                    }
                } else {
                    PipelineError::Provider {
                        provider: "llm".into(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();

        if retryable_status(status) {
            return Err(PipelineError::TransientProvider {
                provider: "llm".into(),
                message: format!("status {status}"),
            });
        }
        if !(200..300).contains(&status) {
            let snippet: String = body.chars().take(800).collect();
            return Err(PipelineError::Provider {
                provider: "llm".into(),
                message: format!("status {status}: {snippet}"),
            });
        }

        let mut parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| PipelineError::Provider {
                provider: "llm".into(),
                message: format!("json parse: {e}"),
            })?;
        let counts = parsed.usage.take().unwrap_or_default();

        Ok(LlmCallOutput {
            model: model.to_string(),
            content: parsed.first_content(),
            usage: LlmUsage {
                prompt_tokens: counts.prompt_tokens,
                completion_tokens: counts.completion_tokens,
                total_tokens: counts.total_tokens,
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Outgoing `/chat/completions` body. Borrows everything; the wire field
/// names are fixed by the OpenAI-compatible protocol.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RoleContent<'a>>,
    temperature: f64,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct RoleContent<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Incoming response, reduced to the two things the policy layer reads:
/// the first choice's content and the token counts.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    usage: Option<TokenCounts>,
}

impl ChatResponse {
    fn first_content(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(|m| m.content)
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    #[serde(default)]
    message: Option<ResponseText>,
}

#[derive(Debug, Deserialize)]
struct ResponseText {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenCounts {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}
