// Variable-management tools: `init_store`, `store_append`, `store_read`,
// `build_text`.
//
// These `invoke()` bodies are never reached at runtime — the executor
// intercepts these four tool names before dispatching to the catalog
// (`clinflow_core::executor::execute_store_tool`) and performs the actual
// store mutation against its own `VariableStores` registry. Each tool is
// stateless: it returns a declaration of intent, and the executor handles
// the actual operation. They stay registered here so
// `ToolCatalog::list()`/`tool_specs_map()` can describe them to planning
// agents.

use async_trait::async_trait;
use serde_json::{json, Value};

use clinflow_core::catalog::{Tool, ToolContext, ToolRole};
use clinflow_core::error::Result;
use clinflow_core::llm::CallMeta;

pub struct InitStore;

#[async_trait]
impl Tool for InitStore {
    fn name(&self) -> &str {
        "init_store"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Writer
    }
    fn category(&self) -> &str {
        "variable_management"
    }
    fn description(&self) -> &str {
        "Create an empty store for accumulating data. Use 'list' for collecting items, 'text' for concatenating strings, or 'dict' for key-value pairs."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Unique identifier for the store"},
                "type": {"type": "string", "enum": ["list", "text", "dict"], "description": "Type of store: 'list' for arrays, 'text' for string concatenation, 'dict' for key-value pairs"},
            },
            "required": ["name", "type"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "store_name": {"type": "string", "description": "The name of the created store"},
                "type": {"type": "string", "description": "The type of the store (list, text, or dict)"},
                "initialized": {"type": "boolean", "description": "Whether the store was successfully initialized"},
            },
            "required": ["store_name", "type", "initialized"],
        })
    }

    async fn invoke(&self, inputs: Value, _ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let name = inputs.get("name").cloned().unwrap_or(Value::Null);
        let kind = inputs.get("type").cloned().unwrap_or(Value::Null);
        Ok((json!({"store_name": name, "type": kind, "initialized": true}), CallMeta::default()))
    }
}

pub struct StoreAppend;

#[async_trait]
impl Tool for StoreAppend {
    fn name(&self) -> &str {
        "store_append"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Writer
    }
    fn category(&self) -> &str {
        "variable_management"
    }
    fn description(&self) -> &str {
        "Add a value to a store. For list: appends item. For text: concatenates with separator. For dict: sets key=value (key required)."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "store": {"type": "string", "description": "Name of the store to append to"},
                "value": {"description": "Value to add to the store (any JSON-serializable type)"},
                "key": {"type": "string", "description": "Key for dict stores (required for dict type, ignored for list/text)"},
                "separator": {"type": "string", "default": "\n", "description": "Separator for text stores when concatenating (default: newline)"},
            },
            "required": ["store", "value"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "store_name": {"type": "string", "description": "The name of the store that was appended to"},
                "success": {"type": "boolean", "description": "Whether the append operation was successful"},
            },
            "required": ["store_name", "success"],
        })
    }

    async fn invoke(&self, inputs: Value, _ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let store = inputs.get("store").cloned().unwrap_or(Value::Null);
        Ok((json!({"store_name": store, "success": true}), CallMeta::default()))
    }
}

pub struct StoreRead;

#[async_trait]
impl Tool for StoreRead {
    fn name(&self) -> &str {
        "store_read"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Writer
    }
    fn category(&self) -> &str {
        "variable_management"
    }
    fn description(&self) -> &str {
        "Read the contents of a store. Returns the full store contents, or a specific key for dict stores."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "store": {"type": "string", "description": "Name of the store to read from"},
                "key": {"type": "string", "description": "For dict stores: specific key to retrieve (optional, returns full dict if not provided)"},
            },
            "required": ["store"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({"description": "The contents of the store. Type depends on store type: array for list, string for text, object for dict."})
    }

    async fn invoke(&self, inputs: Value, _ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let store = inputs.get("store").cloned().unwrap_or(Value::Null);
        let key = inputs.get("key").cloned().unwrap_or(Value::Null);
        Ok((json!({"store_name": store, "key": key, "_pending_read": true}), CallMeta::default()))
    }
}

pub struct BuildText;

#[async_trait]
impl Tool for BuildText {
    fn name(&self) -> &str {
        "build_text"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Writer
    }
    fn category(&self) -> &str {
        "variable_management"
    }
    fn description(&self) -> &str {
        "Format a list or store data into a text string. Use 'join' mode for simple concatenation, or provide a template for custom formatting."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": {"description": "Store name or direct list/array data to format"},
                "mode": {"type": "string", "enum": ["join"], "default": "join", "description": "Formatting mode: 'join' concatenates items with separator"},
                "template": {"type": "string", "description": "Template for custom formatting using {{item}}/{{items}}. If provided, overrides mode."},
                "separator": {"type": "string", "default": "\n", "description": "Separator for 'join' mode (default: newline)"},
            },
            "required": ["source"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string", "description": "The formatted text output"}},
            "required": ["text"],
        })
    }

    async fn invoke(&self, inputs: Value, _ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        Ok((json!({"text": inputs.get("source").cloned().unwrap_or(Value::Null)}), CallMeta::default()))
    }
}
