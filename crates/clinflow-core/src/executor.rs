// Workflow Executor: interprets a validated `Workflow` against a patient
// context and returns an immutable result envelope. Owns the run's scope
// stack, its variable-store registry, and a running cost accumulator; reads
// tools from a `ToolCatalog` it does not own.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::catalog::{ToolCatalog, ToolContext, ToolRole};
use crate::error::{CoreError, Result};
use crate::llm::CallMeta;
use crate::template::{eval_condition, eval_expr, render_template, Rendered, ScopeStack};
use crate::workflow::{IfStep, LoopStep, OutputDefinition, OutputMapping, Step, ToolStep, Workflow};

/// The four writer tool names whose effects are materialized by the
/// executor itself rather than by a catalog-registered `Tool` impl — the
/// tool call is a declaration of intent, not an operation with its own
/// state.
const INIT_STORE: &str = "init_store";
const STORE_APPEND: &str = "store_append";
const STORE_READ: &str = "store_read";
const BUILD_TEXT: &str = "build_text";

#[derive(Debug, Clone)]
enum StoreValue {
    List(Vec<Value>),
    Text(String),
    Dict(Map<String, Value>),
}

/// The executor-owned registry of named variable stores. Lives for exactly
/// one workflow run; stores are not persisted or shared across runs.
#[derive(Debug, Default)]
struct VariableStores {
    stores: HashMap<String, StoreValue>,
}

impl VariableStores {
    fn init(&mut self, name: &str, kind: &str, step_id: &str) -> Result<()> {
        let value = match kind {
            "list" => StoreValue::List(Vec::new()),
            "text" => StoreValue::Text(String::new()),
            "dict" => StoreValue::Dict(Map::new()),
            other => {
                return Err(CoreError::tool(step_id, format!("unknown store type '{other}'")))
            }
        };
        self.stores.insert(name.to_string(), value);
        Ok(())
    }

    fn append(
        &mut self,
        store: &str,
        value: Value,
        key: Option<String>,
        separator: Option<String>,
        step_id: &str,
    ) -> Result<()> {
        let entry = self
            .stores
            .get_mut(store)
            .ok_or_else(|| CoreError::tool(step_id, format!("store '{store}' was never initialized")))?;
        match entry {
            StoreValue::List(items) => items.push(value),
            StoreValue::Text(text) => {
                let sep = separator.unwrap_or_default();
                if !text.is_empty() {
                    text.push_str(&sep);
                }
                text.push_str(&stringify(&value));
            }
            StoreValue::Dict(map) => {
                let key = key.ok_or_else(|| {
                    CoreError::tool(step_id, format!("store_append into dict store '{store}' requires a key"))
                })?;
                map.insert(key, value);
            }
        }
        Ok(())
    }

    fn read(&self, store: &str, key: Option<&str>, step_id: &str) -> Result<Value> {
        let entry = self
            .stores
            .get(store)
            .ok_or_else(|| CoreError::tool(step_id, format!("store '{store}' was never initialized")))?;
        match entry {
            StoreValue::List(items) => Ok(Value::Array(items.clone())),
            StoreValue::Text(text) => Ok(Value::String(text.clone())),
            StoreValue::Dict(map) => match key {
                Some(k) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
                None => Ok(Value::Object(map.clone())),
            },
        }
    }

    fn items_value(&self, store: &str, step_id: &str) -> Result<Value> {
        self.read(store, None, step_id)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The output of a completed workflow run: a named variable value, attached
/// to whichever output definition it was mapped from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputValue {
    pub output_definition_id: String,
    pub value: Value,
}

/// The immutable result of a `Workflow` run against one patient encounter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultEnvelope {
    pub mrn: i64,
    pub csn: i64,
    pub output_definitions: Vec<OutputDefinition>,
    pub output_values: Vec<OutputValue>,
}

#[derive(Debug, Clone, Default)]
pub struct CostAccumulator {
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl CostAccumulator {
    fn add(&mut self, meta: &CallMeta) {
        self.cost += meta.cost;
        self.input_tokens += meta.input_tokens as u64;
        self.output_tokens += meta.output_tokens as u64;
    }
}

/// Interprets one `Workflow` against one patient scope. Not `Clone`, not
/// reused across runs — a fresh `Executor` is built per `execute_workflow`
/// call.
pub struct Executor<'a> {
    catalog: &'a ToolCatalog,
    scopes: ScopeStack,
    stores: VariableStores,
    cost: CostAccumulator,
    ctx: ToolContext,
}

impl<'a> Executor<'a> {
    pub fn new(catalog: &'a ToolCatalog, ctx: ToolContext) -> Self {
        Self {
            catalog,
            scopes: ScopeStack::new(),
            stores: VariableStores::default(),
            cost: CostAccumulator::default(),
            ctx,
        }
    }

    pub fn cost(&self) -> &CostAccumulator {
        &self.cost
    }

    pub async fn execute_workflow(
        mut self,
        workflow: &Workflow,
        initial_vars: HashMap<String, Value>,
    ) -> Result<ResultEnvelope> {
        self.scopes = ScopeStack::with_base(initial_vars);
        debug!(steps = workflow.steps.len(), "starting workflow execution");

        for step in &workflow.steps {
            self.execute_step(step).await?;
        }

        let output_definitions = if workflow.output_definitions.is_empty() {
            derive_output_definitions(&workflow.steps, self.catalog)
        } else {
            workflow.output_definitions.clone()
        };
        let output_values = self.project_output_values(&output_definitions, &workflow.output_mappings);

        Ok(ResultEnvelope {
            mrn: self.ctx.mrn,
            csn: self.ctx.csn,
            output_definitions,
            output_values,
        })
    }

    fn execute_step<'b>(
        &'b mut self,
        step: &'b Step,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'b>> {
        Box::pin(async move {
            match step {
                Step::Tool(s) => self.execute_tool_step(s).await,
                Step::Loop(s) => self.execute_loop_step(s).await,
                Step::If(s) => self.execute_if_step(s).await,
                Step::FlagVariable(s) => {
                    self.scopes.set(s.variable.clone(), Value::Bool(s.value));
                    Ok(())
                }
            }
        })
    }

    async fn execute_tool_step(&mut self, step: &ToolStep) -> Result<()> {
        trace!(step_id = %step.id, tool = %step.tool, "executing tool step");

        if let Some(value) = self.execute_store_tool(step)? {
            if let Some(output) = &step.output {
                self.scopes.set_base(output.clone(), value);
            }
            return Ok(());
        }

        let rendered_inputs = render_inputs(&step.inputs, &self.scopes, &step.id)?;
        let (result, meta) = self
            .catalog
            .invoke(&step.tool, rendered_inputs, &self.ctx)
            .await
            .map_err(|e| CoreError::tool(&step.id, e.to_string()))?;
        self.cost.add(&meta);

        if let Some(output) = &step.output {
            self.scopes.set(output.clone(), result);
        }
        Ok(())
    }

    /// Handles `init_store`/`store_append`/`store_read`/`build_text`
    /// directly rather than dispatching to the catalog: these four tools
    /// are declarations of intent against executor-owned state, not
    /// self-contained operations.
    fn execute_store_tool(&mut self, step: &ToolStep) -> Result<Option<Value>> {
        match step.tool.as_str() {
            INIT_STORE => {
                let name = expect_str(&step.inputs, "name", &step.id)?;
                let kind = expect_str(&step.inputs, "type", &step.id)?;
                self.stores.init(&name, &kind, &step.id)?;
                Ok(Some(Value::Null))
            }
            STORE_APPEND => {
                let store = expect_str(&step.inputs, "store", &step.id)?;
                let raw_value = step
                    .inputs
                    .get("value")
                    .cloned()
                    .ok_or_else(|| CoreError::tool(&step.id, "store_append requires 'value'"))?;
                let rendered = render_inputs(&raw_value, &self.scopes, &step.id)?;
                let key = optional_str(&step.inputs, "key");
                let separator = optional_str(&step.inputs, "separator");
                self.stores.append(&store, rendered, key, separator, &step.id)?;
                Ok(Some(Value::Null))
            }
            STORE_READ => {
                let store = expect_str(&step.inputs, "store", &step.id)?;
                let key = optional_str(&step.inputs, "key");
                let value = self.stores.read(&store, key.as_deref(), &step.id)?;
                Ok(Some(value))
            }
            BUILD_TEXT => {
                let source = expect_str(&step.inputs, "source", &step.id)?;
                let mode = optional_str(&step.inputs, "mode").unwrap_or_else(|| "join".to_string());
                let separator = optional_str(&step.inputs, "separator").unwrap_or_else(|| ", ".to_string());
                let items = self.stores.items_value(&source, &step.id)?;
                let text = match mode.as_str() {
                    "join" => match &items {
                        Value::Array(values) => values.iter().map(stringify).collect::<Vec<_>>().join(&separator),
                        other => stringify(other),
                    },
                    "template" => {
                        self.scopes.push_scope(HashMap::from([("items".to_string(), items)]));
                        let template = expect_str(&step.inputs, "template", &step.id)?;
                        let rendered = render_template(&template, &self.scopes, &step.id)?;
                        self.scopes.pop_scope();
                        stringify(&rendered.into_json())
                    }
                    other => {
                        return Err(CoreError::tool(&step.id, format!("unknown build_text mode '{other}'")))
                    }
                };
                Ok(Some(Value::String(text)))
            }
            _ => Ok(None),
        }
    }

    async fn execute_loop_step(&mut self, step: &LoopStep) -> Result<()> {
        let iterable = eval_expr(&step.in_expr, &self.scopes, &step.id)?;
        let items = iterable
            .as_array()
            .ok_or_else(|| CoreError::template(&step.id, format!("loop 'in' must resolve to a list, got {iterable}")))?
            .clone();

        let mut collected = Map::new();
        for item in items {
            self.scopes.push_scope(HashMap::from([(step.for_var.clone(), item.clone())]));
            let outcome = (async {
                for body_step in &step.body {
                    self.execute_step(body_step).await?;
                }
                Ok::<(), CoreError>(())
            })
            .await;

            if outcome.is_ok() && step.output_dict.is_some() {
                collected.insert(stringify(&item), Value::Object(self.flatten_scopes()));
            }
            self.scopes.pop_scope();
            outcome?;
        }

        if let Some(name) = &step.output_dict {
            self.scopes.set(name.clone(), Value::Object(collected));
        }
        Ok(())
    }

    async fn execute_if_step(&mut self, step: &IfStep) -> Result<()> {
        let condition = eval_condition(&step.condition, &self.scopes, &step.id)?;
        let branch = if condition {
            Some(&step.then)
        } else {
            step.otherwise.as_ref()
        };
        if let Some(branch) = branch {
            for body_step in branch.as_slice() {
                self.execute_step(body_step).await?;
            }
        }
        Ok(())
    }

    fn flatten_scopes(&self) -> Map<String, Value> {
        let mut flattened = Map::new();
        for (name, value) in self.scopes.iter_all() {
            flattened.insert(name.clone(), value.clone());
        }
        flattened
    }

    fn project_output_values(
        &self,
        output_definitions: &[OutputDefinition],
        mappings: &[OutputMapping],
    ) -> Vec<OutputValue> {
        let mut values = Vec::new();
        for definition in output_definitions {
            let mapping = mappings.iter().find(|m| m.output_definition_id == definition.id);
            let Some(mapping) = mapping else { continue };
            let Some(source) = self.scopes.get(&mapping.source_variable) else { continue };
            let value = match &mapping.field {
                Some(field) => source.get(field).cloned().unwrap_or(Value::Null),
                None => source.clone(),
            };
            values.push(OutputValue { output_definition_id: definition.id.clone(), value });
        }
        values
    }
}

fn expect_str(inputs: &Value, field: &str, step_id: &str) -> Result<String> {
    inputs
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CoreError::tool(step_id, format!("missing required field '{field}'")))
}

fn optional_str(inputs: &Value, field: &str) -> Option<String> {
    inputs.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Recursively renders every string leaf of a JSON value as a template
/// against the current scope stack. Objects and arrays pass through
/// structurally; a rendered leaf that parses as a list literal becomes a
/// JSON array rather than a string (see `render_template`).
fn render_inputs(value: &Value, scopes: &ScopeStack, step_id: &str) -> Result<Value> {
    match value {
        Value::String(s) => Ok(render_leaf(s, scopes, step_id)?),
        Value::Array(items) => {
            let rendered: Result<Vec<Value>> = items.iter().map(|v| render_inputs(v, scopes, step_id)).collect();
            Ok(Value::Array(rendered?))
        }
        Value::Object(map) => {
            let mut rendered = Map::new();
            for (key, v) in map {
                rendered.insert(key.clone(), render_inputs(v, scopes, step_id)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn render_leaf(text: &str, scopes: &ScopeStack, step_id: &str) -> Result<Value> {
    match render_template(text, scopes, step_id)? {
        Rendered::Value(v) => Ok(v),
        Rendered::Text(s) => Ok(Value::String(s)),
    }
}

/// Auto-derives `output_definitions` from every `compute`-role `ToolStep`
/// reachable in the step tree, walking into loop bodies and both branches
/// of an `if`, matching `Workflow::step_count`'s traversal.
pub fn derive_output_definitions(steps: &[Step], catalog: &ToolCatalog) -> Vec<OutputDefinition> {
    let mut out = Vec::new();
    walk_for_output_definitions(steps, catalog, &mut out);
    out
}

fn walk_for_output_definitions(steps: &[Step], catalog: &ToolCatalog, out: &mut Vec<OutputDefinition>) {
    for step in steps {
        match step {
            Step::Tool(t) => {
                if let Ok(tool) = catalog.get(&t.tool) {
                    if tool.role() == ToolRole::Compute {
                        out.push(OutputDefinition {
                            id: format!("out_{}", t.id),
                            name: t.id.clone(),
                            label: t.step_summary.clone(),
                            tool_name: Some(t.tool.clone()),
                            field_type: "string".to_string(),
                        });
                    }
                }
            }
            Step::Loop(l) => walk_for_output_definitions(&l.body, catalog, out),
            Step::If(i) => {
                walk_for_output_definitions(&i.then.as_slice().into_iter().cloned().collect::<Vec<_>>(), catalog, out);
                if let Some(otherwise) = &i.otherwise {
                    walk_for_output_definitions(&otherwise.as_slice().into_iter().cloned().collect::<Vec<_>>(), catalog, out);
                }
            }
            Step::FlagVariable(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Tool, ToolCatalog};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "uppercase"
        }
        fn role(&self) -> ToolRole {
            ToolRole::Compute
        }
        fn category(&self) -> &str {
            "test"
        }
        fn description(&self) -> &str {
            "uppercases text"
        }
        fn input_schema(&self) -> Value {
            serde_json::json!({})
        }
        fn output_schema(&self) -> Value {
            serde_json::json!({})
        }
        async fn invoke(&self, inputs: Value, _ctx: &ToolContext) -> Result<(Value, CallMeta)> {
            let text = inputs.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok((Value::String(text.to_uppercase()), CallMeta::default()))
        }
    }

    fn catalog() -> ToolCatalog {
        let mut c = ToolCatalog::new();
        c.register(Arc::new(Upper));
        c
    }

    fn initial_vars() -> HashMap<String, Value> {
        HashMap::from([("mrn".to_string(), Value::from(1)), ("csn".to_string(), Value::from(2))])
    }

    #[tokio::test]
    async fn tool_step_binds_output_and_renders_template() {
        let catalog = catalog();
        let workflow = Workflow {
            steps: vec![Step::Tool(ToolStep {
                id: "s1".to_string(),
                step_summary: "shout".to_string(),
                tool: "uppercase".to_string(),
                inputs: serde_json::json!({ "text": "{{ name }}" }),
                output: Some("shouted".to_string()),
            })],
            output_definitions: vec![],
            output_mappings: vec![OutputMapping {
                output_definition_id: "out_s1".to_string(),
                source_variable: "shouted".to_string(),
                field: None,
            }],
        };
        let mut vars = initial_vars();
        vars.insert("name".to_string(), Value::String("hi".to_string()));

        let executor = Executor::new(&catalog, ToolContext { mrn: 1, csn: 2 });
        let envelope = executor.execute_workflow(&workflow, vars).await.unwrap();

        assert_eq!(envelope.output_definitions.len(), 1);
        assert_eq!(envelope.output_definitions[0].tool_name.as_deref(), Some("uppercase"));
        assert_eq!(envelope.output_values[0].value, Value::String("HI".to_string()));
    }

    #[tokio::test]
    async fn loop_step_iterates_and_pops_scope() {
        let catalog = catalog();
        let workflow = Workflow {
            steps: vec![Step::Loop(LoopStep {
                id: "loop1".to_string(),
                for_var: "item".to_string(),
                in_expr: "items".to_string(),
                body: vec![Step::Tool(ToolStep {
                    id: "s1".to_string(),
                    step_summary: "shout".to_string(),
                    tool: "uppercase".to_string(),
                    inputs: serde_json::json!({ "text": "{{ item }}" }),
                    output: Some("shouted".to_string()),
                })],
                output_dict: None,
            })],
            output_definitions: vec![],
            output_mappings: vec![],
        };
        let mut vars = initial_vars();
        vars.insert(
            "items".to_string(),
            Value::Array(vec![Value::String("a".to_string()), Value::String("b".to_string())]),
        );

        let executor = Executor::new(&catalog, ToolContext { mrn: 1, csn: 2 });
        let result = executor.execute_workflow(&workflow, vars).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn if_step_executes_otherwise_branch() {
        let catalog = catalog();
        let workflow = Workflow {
            steps: vec![Step::If(IfStep {
                id: "if1".to_string(),
                condition: "flag".to_string(),
                then: crate::workflow::ThenBranch::One(Box::new(Step::FlagVariable(
                    crate::workflow::FlagVariableStep { id: "t".to_string(), variable: "hit".to_string(), value: true },
                ))),
                otherwise: Some(crate::workflow::ThenBranch::One(Box::new(Step::FlagVariable(
                    crate::workflow::FlagVariableStep { id: "o".to_string(), variable: "hit".to_string(), value: false },
                )))),
            })],
            output_definitions: vec![],
            output_mappings: vec![],
        };
        let mut vars = initial_vars();
        vars.insert("flag".to_string(), Value::Bool(false));

        let executor = Executor::new(&catalog, ToolContext { mrn: 1, csn: 2 });
        executor.execute_workflow(&workflow, vars).await.unwrap();
    }

    #[tokio::test]
    async fn store_tools_materialize_without_catalog_lookup() {
        let catalog = catalog();
        let workflow = Workflow {
            steps: vec![
                Step::Tool(ToolStep {
                    id: "init".to_string(),
                    step_summary: "init list store".to_string(),
                    tool: INIT_STORE.to_string(),
                    inputs: serde_json::json!({ "name": "notes", "type": "list" }),
                    output: None,
                }),
                Step::Tool(ToolStep {
                    id: "append".to_string(),
                    step_summary: "append".to_string(),
                    tool: STORE_APPEND.to_string(),
                    inputs: serde_json::json!({ "store": "notes", "value": "a" }),
                    output: None,
                }),
                Step::Tool(ToolStep {
                    id: "read".to_string(),
                    step_summary: "read".to_string(),
                    tool: STORE_READ.to_string(),
                    inputs: serde_json::json!({ "store": "notes" }),
                    output: Some("result".to_string()),
                }),
            ],
            output_definitions: vec![],
            output_mappings: vec![OutputMapping {
                output_definition_id: "out_read".to_string(),
                source_variable: "result".to_string(),
                field: None,
            }],
        };
        let executor = Executor::new(&catalog, ToolContext { mrn: 1, csn: 2 });
        let envelope = executor.execute_workflow(&workflow, initial_vars()).await.unwrap();
        // none of the store tools are `compute`-role (they aren't registered
        // at all), so no output definitions are auto-derived and the
        // mapping has nothing to attach to.
        assert!(envelope.output_values.is_empty());
    }
}
