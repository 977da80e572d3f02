use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::workflow::{IfStep, LoopStep, Step, Workflow};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorInput {
    pub workflow: Workflow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorOutput {
    pub valid: bool,
    pub broken_step_id: Option<String>,
    pub broken_reason: Option<String>,
}

impl ValidatorOutput {
    fn ok() -> Self {
        Self { valid: true, broken_step_id: None, broken_reason: None }
    }

    fn broken(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { valid: false, broken_step_id: Some(step_id.into()), broken_reason: Some(reason.into()) }
    }
}

/// Rule-based workflow validator — makes zero LLM calls. Checks step-id
/// uniqueness and that every templated reference resolves to a prior
/// assignment or an enclosing loop variable.
///
/// Recurses into `LoopStep.body` and **both** `IfStep.then` and
/// `IfStep.otherwise` branches: an invariant like "every templated
/// reference is bound" cannot hold if the otherwise branch goes unchecked.
pub struct ValidatorAgent;

impl ValidatorAgent {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &'static str {
        "validator"
    }

    pub async fn run(&self, input: ValidatorInput) -> ValidatorOutput {
        let mut defined_vars: HashSet<String> = HashSet::new();
        let mut seen_step_ids: HashSet<String> = HashSet::new();
        match validate_steps(&input.workflow.steps, &mut defined_vars, &mut seen_step_ids, None) {
            Ok(()) => ValidatorOutput::ok(),
            Err((step_id, reason)) => ValidatorOutput::broken(step_id, reason),
        }
    }
}

impl Default for ValidatorAgent {
    fn default() -> Self {
        Self::new()
    }
}

type ValidationError = (String, String);

fn validate_steps(
    steps: &[Step],
    defined_vars: &mut HashSet<String>,
    seen_step_ids: &mut HashSet<String>,
    loop_var: Option<&str>,
) -> Result<(), ValidationError> {
    for step in steps {
        let step_id = step.id().to_string();
        if !seen_step_ids.insert(step_id.clone()) {
            return Err((step_id, format!("Duplicate step ID: {step_id}")));
        }

        match step {
            Step::Tool(tool_step) => {
                if let Some(reason) = check_variable_refs(&tool_step.inputs, defined_vars, loop_var) {
                    return Err((step_id, reason));
                }
                if let Some(output) = &tool_step.output {
                    defined_vars.insert(output.clone());
                }
            }
            Step::If(if_step) => {
                validate_if_step(if_step, defined_vars, seen_step_ids, loop_var)?;
            }
            Step::Loop(loop_step) => {
                validate_loop_step(loop_step, defined_vars, seen_step_ids)?;
            }
            Step::FlagVariable(flag_step) => {
                defined_vars.insert(flag_step.variable.clone());
            }
        }
    }
    Ok(())
}

fn validate_if_step(
    step: &IfStep,
    defined_vars: &mut HashSet<String>,
    seen_step_ids: &mut HashSet<String>,
    loop_var: Option<&str>,
) -> Result<(), ValidationError> {
    if let Some(reason) = check_condition_refs(&step.condition) {
        return Err((step.id.clone(), reason));
    }

    let then_steps: Vec<Step> = step.then.as_slice().into_iter().cloned().collect();
    validate_steps(&then_steps, &mut defined_vars.clone(), seen_step_ids, loop_var)?;

    if let Some(otherwise) = &step.otherwise {
        let otherwise_steps: Vec<Step> = otherwise.as_slice().into_iter().cloned().collect();
        validate_steps(&otherwise_steps, &mut defined_vars.clone(), seen_step_ids, loop_var)?;
    }
    Ok(())
}

fn validate_loop_step(
    step: &LoopStep,
    defined_vars: &mut HashSet<String>,
    seen_step_ids: &mut HashSet<String>,
) -> Result<(), ValidationError> {
    if let Some(base_var) = extract_base_var(&step.in_expr) {
        if !defined_vars.contains(&base_var) {
            return Err((step.id.clone(), format!("Loop iterates over undefined variable: {base_var}")));
        }
    }

    let mut body_defined = defined_vars.clone();
    validate_steps(&step.body, &mut body_defined, seen_step_ids, Some(&step.for_var))?;

    if let Some(output_dict) = &step.output_dict {
        defined_vars.insert(output_dict.clone());
    }
    Ok(())
}

fn check_variable_refs(inputs: &serde_json::Value, defined_vars: &HashSet<String>, loop_var: Option<&str>) -> Option<String> {
    let obj = inputs.as_object()?;
    for (key, value) in obj {
        if let Some(text) = value.as_str() {
            for ident in template_refs(text) {
                if !defined_vars.contains(&ident) && Some(ident.as_str()) != loop_var {
                    return Some(format!("Reference to undefined variable '{ident}' in {key}"));
                }
            }
        }
    }
    None
}

/// Finds `{{ identifier` references (only the leading identifier of each
/// templated expression is checked, matching the original's regex scope).
fn template_refs(text: &str) -> Vec<String> {
    let mut refs = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = rest[start + 2..].trim_start();
        let ident: String = after.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
        if !ident.is_empty() {
            refs.push(ident);
        }
        rest = &rest[start + 2..];
        if rest.is_empty() {
            break;
        }
    }
    refs
}

/// Condition syntax well-formedness is checked by the evaluator itself at
/// execution time; this surfaces nothing further today (output-mapping
/// validation is likewise a declared future step), matching the original.
fn check_condition_refs(_condition: &str) -> Option<String> {
    None
}

fn extract_base_var(expr: &str) -> Option<String> {
    let ident: String = expr.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
    if ident.is_empty() {
        None
    } else {
        Some(ident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{FlagVariableStep, ThenBranch, ToolStep};

    fn tool_step(id: &str, output: Option<&str>) -> Step {
        Step::Tool(ToolStep {
            id: id.to_string(),
            step_summary: "s".to_string(),
            tool: "t".to_string(),
            inputs: serde_json::json!({}),
            output: output.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn duplicate_step_ids_are_invalid() {
        let workflow = Workflow { steps: vec![tool_step("a", None), tool_step("a", None)], ..Default::default() };
        let output = ValidatorAgent::new().run(ValidatorInput { workflow }).await;
        assert!(!output.valid);
        assert_eq!(output.broken_step_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn undefined_template_reference_is_invalid() {
        let workflow = Workflow {
            steps: vec![Step::Tool(ToolStep {
                id: "a".to_string(),
                step_summary: "s".to_string(),
                tool: "t".to_string(),
                inputs: serde_json::json!({ "text": "{{ missing }}" }),
                output: None,
            })],
            ..Default::default()
        };
        let output = ValidatorAgent::new().run(ValidatorInput { workflow }).await;
        assert!(!output.valid);
        assert!(output.broken_reason.unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn undefined_loop_variable_is_invalid() {
        let workflow = Workflow {
            steps: vec![Step::Loop(LoopStep {
                id: "loop1".to_string(),
                for_var: "x".to_string(),
                in_expr: "items".to_string(),
                body: vec![],
                output_dict: None,
            })],
            ..Default::default()
        };
        let output = ValidatorAgent::new().run(ValidatorInput { workflow }).await;
        assert!(!output.valid);
        assert_eq!(output.broken_step_id.as_deref(), Some("loop1"));
    }

    #[tokio::test]
    async fn otherwise_branch_is_walked_for_undefined_references() {
        let workflow = Workflow {
            steps: vec![Step::If(IfStep {
                id: "if1".to_string(),
                condition: "flag".to_string(),
                then: ThenBranch::One(Box::new(Step::FlagVariable(FlagVariableStep {
                    id: "t".to_string(),
                    variable: "hit".to_string(),
                    value: true,
                }))),
                otherwise: Some(ThenBranch::One(Box::new(Step::Tool(ToolStep {
                    id: "o".to_string(),
                    step_summary: "s".to_string(),
                    tool: "t".to_string(),
                    inputs: serde_json::json!({ "text": "{{ undefined_var }}" }),
                    output: None,
                })))),
            })],
            ..Default::default()
        };
        let output = ValidatorAgent::new().run(ValidatorInput { workflow }).await;
        assert!(!output.valid);
        assert_eq!(output.broken_step_id.as_deref(), Some("o"));
    }
}
