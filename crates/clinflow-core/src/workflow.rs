// Workflow data model: a declarative tree of steps operating on a patient
// encounter. Steps are a tagged union, matched exhaustively everywhere they
// are interpreted — there is deliberately no step trait/class hierarchy.

use serde::{Deserialize, Serialize};
#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// A complete, committable workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Workflow {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub output_definitions: Vec<OutputDefinition>,
    #[serde(default)]
    pub output_mappings: Vec<OutputMapping>,
}

impl Workflow {
    pub fn step_count(&self) -> usize {
        fn count(steps: &[Step]) -> usize {
            steps
                .iter()
                .map(|s| {
                    1 + match s {
                        Step::Loop(l) => count(&l.body),
                        Step::If(i) => {
                            count(i.then.as_slice()) + i.otherwise.as_ref().map_or(0, |o| count(o.as_slice()))
                        }
                        Step::Tool(_) | Step::FlagVariable(_) => 0,
                    }
                })
                .sum()
        }
        count(&self.steps)
    }
}

/// A step variant. `type` is the serde tag; loop steps keep the workflow
/// JSON format's aliased `for`/`in` keys so round-tripping never renames a
/// field an agent produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Tool(ToolStep),
    Loop(LoopStep),
    If(IfStep),
    FlagVariable(FlagVariableStep),
}

impl Step {
    pub fn id(&self) -> &str {
        match self {
            Step::Tool(s) => &s.id,
            Step::Loop(s) => &s.id,
            Step::If(s) => &s.id,
            Step::FlagVariable(s) => &s.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ToolStep {
    pub id: String,
    pub step_summary: String,
    pub tool: String,
    /// Schema-typed per the tool's own input model; kept generic here since
    /// each tool validates its own shape (see `clinflow-tools`).
    pub inputs: serde_json::Value,
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct LoopStep {
    pub id: String,
    #[serde(rename = "for")]
    pub for_var: String,
    #[serde(rename = "in")]
    pub in_expr: String,
    pub body: Vec<Step>,
    #[serde(default)]
    pub output_dict: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct IfStep {
    pub id: String,
    pub condition: String,
    pub then: ThenBranch,
    #[serde(default)]
    pub otherwise: Option<ThenBranch>,
}

/// `then`/`otherwise` accept either a single step or a list, matching the
/// original's duck-typed branch field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(untagged)]
pub enum ThenBranch {
    One(Box<Step>),
    Many(Vec<Step>),
}

impl ThenBranch {
    pub fn as_slice(&self) -> Vec<&Step> {
        match self {
            ThenBranch::One(s) => vec![s.as_ref()],
            ThenBranch::Many(v) => v.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct FlagVariableStep {
    pub id: String,
    pub variable: String,
    pub value: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct OutputDefinition {
    pub id: String,
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default = "default_field_type")]
    pub field_type: String,
}

fn default_field_type() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct OutputMapping {
    pub output_definition_id: String,
    pub source_variable: String,
    pub field: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_step(id: &str) -> Step {
        Step::Tool(ToolStep {
            id: id.to_string(),
            step_summary: "read a note".to_string(),
            tool: "read_patient_note".to_string(),
            inputs: serde_json::json!({ "note_id": "{{ note_id }}" }),
            output: Some("note".to_string()),
        })
    }

    #[test]
    fn loop_step_round_trips_aliased_keys() {
        let workflow = Workflow {
            steps: vec![Step::Loop(LoopStep {
                id: "loop1".to_string(),
                for_var: "note_id".to_string(),
                in_expr: "note_ids".to_string(),
                body: vec![tool_step("step1")],
                output_dict: None,
            })],
            output_definitions: vec![],
            output_mappings: vec![],
        };
        let json = serde_json::to_value(&workflow).unwrap();
        let loop_json = &json["steps"][0];
        assert_eq!(loop_json["for"], "note_id");
        assert_eq!(loop_json["in"], "note_ids");
        assert!(loop_json.get("for_var").is_none());

        let back: Workflow = serde_json::from_value(json).unwrap();
        assert_eq!(back, workflow);
    }

    #[test]
    fn step_count_recurses_into_loop_and_both_if_branches() {
        let workflow = Workflow {
            steps: vec![
                tool_step("a"),
                Step::If(IfStep {
                    id: "if1".to_string(),
                    condition: "{{ flag }}".to_string(),
                    then: ThenBranch::One(Box::new(tool_step("b"))),
                    otherwise: Some(ThenBranch::Many(vec![tool_step("c"), tool_step("d")])),
                }),
                Step::Loop(LoopStep {
                    id: "loop1".to_string(),
                    for_var: "x".to_string(),
                    in_expr: "items".to_string(),
                    body: vec![tool_step("e")],
                    output_dict: None,
                }),
            ],
            output_definitions: vec![],
            output_mappings: vec![],
        };
        assert_eq!(workflow.step_count(), 6);
    }
}
