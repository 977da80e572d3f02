// OpenAI chat-completions implementation of `clinflow_core::llm::LlmClient`.
//
// Unlike a streaming agent-loop driver, every caller of `LlmClient::call`
// wants one accumulated response, so this talks to the API with
// `stream: false` rather than adapting an SSE stream into a single string.

mod pricing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use clinflow_core::error::{CoreError, Result};
use clinflow_core::llm::{CallMeta, LlmCallResult, LlmClient, LlmRequest, LlmRole};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    default_model: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Builds a client from the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| CoreError::llm("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_url: api_url.into(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn convert_role(role: LlmRole) -> &'static str {
        match role {
            LlmRole::System => "system",
            LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn call(&self, req: LlmRequest) -> Result<LlmCallResult> {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);
        if let Some(system) = &req.system {
            messages.push(OpenAiMessage { role: "system", content: system.clone() });
        }
        for msg in &req.messages {
            messages.push(OpenAiMessage {
                role: Self::convert_role(msg.role),
                content: msg.content.clone(),
            });
        }

        let response_format = req
            .schema
            .as_ref()
            .map(|_| serde_json::json!({ "type": "json_object" }));

        let body = OpenAiRequest {
            model: req.model.clone().unwrap_or_else(|| self.default_model.clone()),
            messages,
            temperature: req.temperature,
            stream: false,
            response_format,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::llm(format!("failed to send request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CoreError::llm(format!("OpenAI API error ({status}): {error_text}")));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| CoreError::llm(format!("failed to parse response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
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
    fn with_base_url_overrides_the_default_endpoint() {
        let client = OpenAiClient::with_base_url("key", "https://example.com/v1/chat/completions");
        assert_eq!(client.api_url, "https://example.com/v1/chat/completions");
    }

    #[test]
    fn with_default_model_is_used_when_request_names_none() {
        let client = OpenAiClient::new("key").with_default_model("gpt-4.1-mini");
        assert_eq!(client.default_model, "gpt-4.1-mini");
    }
}
