// Tool Catalog: a closed, process-start registry of named, schema-described
// operations. Agents plan over `list()`; the executor calls `invoke()`
// uniformly regardless of whether a tool is a plain reader or an
// LLM-backed analyzer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::llm::CallMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRole {
    Reader,
    Compute,
    Writer,
}

/// Context threaded into every tool invocation: the patient scope and a
/// handle back to the catalog (a tool never reaches outside this).
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub mrn: i64,
    pub csn: i64,
}

/// Optional mapping from a tool call's arguments to a frontend-visible data
/// item (observability detail only; never consulted by the executor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataItemEvent {
    pub resource_type: String,
    pub resource_id: String,
    pub status: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn role(&self) -> ToolRole;
    fn category(&self) -> &str;
    fn description(&self) -> &str;
    fn uses_llm(&self) -> bool {
        false
    }
    fn input_schema(&self) -> serde_json::Value;
    fn output_schema(&self) -> serde_json::Value;

    /// Optional per-call data-item extraction; see `DataItemEvent`.
    fn data_item_extractor(
        &self,
        _inputs: &serde_json::Value,
    ) -> Option<DataItemEvent> {
        None
    }

    async fn invoke(
        &self,
        inputs: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<(serde_json::Value, CallMeta)>;
}

/// Summary row returned by `ToolCatalog::list()`:
/// `(name, category, role, description, input_schema, output_schema,
/// uses_llm)`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub category: String,
    pub role: ToolRole,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    pub uses_llm: bool,
}

/// The closed set of tools available to the executor and to agents
/// planning over it. Built once at process start; tools have no per-call
/// identity.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownTool(name.to_string()))
    }

    pub fn list(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                category: t.category().to_string(),
                role: t.role(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
                output_schema: t.output_schema(),
                uses_llm: t.uses_llm(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// `tool_specs` as consumed by agents: a map keyed by tool name, used
    /// verbatim in system prompts (`json.dumps(tool_specs, indent=2)` in the
    /// original).
    pub fn tool_specs_map(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .list()
            .into_iter()
            .map(|spec| {
                (
                    spec.name.clone(),
                    serde_json::json!({
                        "category": spec.category,
                        "role": spec.role,
                        "description": spec.description,
                        "input_schema": spec.input_schema,
                        "output_schema": spec.output_schema,
                        "uses_llm": spec.uses_llm,
                    }),
                )
            })
            .collect();
        serde_json::Value::Object(map)
    }

    pub async fn invoke(
        &self,
        name: &str,
        inputs: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<(serde_json::Value, CallMeta)> {
        let tool = self.get(name)?;
        tool.invoke(inputs, ctx).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn role(&self) -> ToolRole {
            ToolRole::Reader
        }
        fn category(&self) -> &str {
            "test"
        }
        fn description(&self) -> &str {
            "echoes input"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        fn output_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn invoke(
            &self,
            inputs: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<(serde_json::Value, CallMeta)> {
            Ok((inputs, CallMeta::default()))
        }
    }

    #[tokio::test]
    async fn unknown_tool_errors() {
        let catalog = ToolCatalog::new();
        let err = catalog.get("nope").unwrap_err();
        assert!(matches!(err, CoreError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn registered_tool_invokes() {
        let mut catalog = ToolCatalog::new();
        catalog.register(Arc::new(Echo));
        let ctx = ToolContext { mrn: 1, csn: 2 };
        let (out, _meta) = catalog
            .invoke("echo", serde_json::json!({"x": 1}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"x": 1}));
    }
}
