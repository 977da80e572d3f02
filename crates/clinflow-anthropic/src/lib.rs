// Anthropic Messages API implementation of `clinflow_core::llm::LlmClient`.
//
// System prompt is a top-level request field rather than a message with
// role "system" — the Messages API splits it out, unlike chat-completions.

mod pricing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use clinflow_core::error::{CoreError, Result};
use clinflow_core::llm::{CallMeta, LlmCallResult, LlmClient, LlmRequest, LlmRole};

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    default_model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Builds a client from the `ANTHROPIC_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| CoreError::llm("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_url: api_url.into(),
            default_model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn convert_role(role: LlmRole) -> &'static str {
        match role {
            // The Messages API has no system-role message; callers that
            // put a system-role entry in `messages` get folded into a
            // user turn rather than dropped.
            LlmRole::System | LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn call(&self, req: LlmRequest) -> Result<LlmCallResult> {
        let messages = req
            .messages
            .iter()
            .map(|msg| AnthropicMessage {
                role: Self::convert_role(msg.role),
                content: msg.content.clone(),
            })
            .collect();

        let body = AnthropicRequest {
            model: req.model.clone().unwrap_or_else(|| self.default_model.clone()),
            messages,
            max_tokens: self.max_tokens,
            temperature: req.temperature,
            system: req.system.clone(),
            stream: false,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::llm(format!("failed to send request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CoreError::llm(format!("Anthropic API error ({status}): {error_text}")));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| CoreError::llm(format!("failed to parse response: {e}")))?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or((0, 0));

        let cost = pricing::estimate_cost(&body.model, input_tokens, output_tokens);

        Ok(LlmCallResult {
            text,
            meta: CallMeta { cost, input_tokens, output_tokens },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_max_tokens_overrides_the_default() {
        let client = AnthropicClient::new("key").with_max_tokens(8192);
        assert_eq!(client.max_tokens, 8192);
    }

    #[test]
    fn with_base_url_overrides_the_default_endpoint() {
        let client = AnthropicClient::with_base_url("key", "https://example.com/v1/messages");
        assert_eq!(client.api_url, "https://example.com/v1/messages");
    }
}
