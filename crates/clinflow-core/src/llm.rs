// LLM Client capability: a single abstraction over "plain call" and
// "schema-constrained structured call", with cost/token accounting baked in
// so agents never have to reach past this trait for billing data.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub messages: Vec<LlmMessage>,
    pub system: Option<String>,
    pub temperature: f32,
    pub model: Option<String>,
    /// JSON schema the structured call must conform to; ignored by `call`.
    pub schema: Option<serde_json::Value>,
}

impl LlmRequest {
    pub fn new(messages: Vec<LlmMessage>) -> Self {
        Self {
            messages,
            system: None,
            temperature: 0.7,
            model: None,
            schema: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallMeta {
    pub cost: f64,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct LlmCallResult {
    pub text: String,
    pub meta: CallMeta,
}

/// Result of a structured (schema-constrained) call. `parsed` is `None` on
/// a schema-validation failure — that is not an error, it is a result every
/// caller is expected to check, matching the original's `result.parsed`
/// optionality.
#[derive(Debug, Clone)]
pub struct StructuredCallResult<T> {
    pub parsed: Option<T>,
    pub raw_text: String,
    pub meta: CallMeta,
}

/// Object-safe LLM capability: a single `call` method. Structured calls are
/// a free function (`call_structured`) layered on top, not a trait method —
/// a generic method would make `Arc<dyn LlmClient>` impossible, and every
/// agent holds the client behind exactly that object type.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn call(&self, req: LlmRequest) -> Result<LlmCallResult>;
}

/// Issue a schema-constrained call and attempt to parse the response as `T`.
/// A parse miss is not an error — `parsed: None` is the expected, checked
/// outcome every agent handles, mirroring the original's `result.parsed`.
pub async fn call_structured<T>(
    client: &(dyn LlmClient + '_),
    req: LlmRequest,
) -> Result<StructuredCallResult<T>>
where
    T: DeserializeOwned,
{
    let result = client.call(req).await?;
    let parsed = serde_json::from_str(&result.text).ok();
    Ok(StructuredCallResult {
        parsed,
        raw_text: result.text,
        meta: result.meta,
    })
}

/// Deterministic, network-free provider for tests. Each call pops the next
/// scripted response off its queue.
#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    use super::*;
    use std::sync::Mutex;

    pub struct StubLlmProvider {
        responses: Mutex<Vec<String>>,
    }

    impl StubLlmProvider {
        pub fn new(responses: Vec<String>) -> Self {
            Self { responses: Mutex::new(responses) }
        }
    }

    #[async_trait]
    impl LlmClient for StubLlmProvider {
        async fn call(&self, _req: LlmRequest) -> Result<LlmCallResult> {
            let mut responses = self.responses.lock().unwrap();
            let text = if responses.is_empty() {
                String::new()
            } else {
                responses.remove(0)
            };
            Ok(LlmCallResult {
                text,
                meta: CallMeta { cost: 0.001, input_tokens: 10, output_tokens: 10 },
            })
        }
    }
}
