// Shared helpers for deserializing tool inputs and serializing outputs.
//
// Every tool in this crate follows the same shape as the Python originals:
// take a typed input, return a typed output plus a `CallMeta`. `ctx.mrn`/
// `ctx.csn` supply the patient scope that every Python `Input` model instead
// repeated as `mrn`/`csn` fields — folding them into `ToolContext` means a
// tool's own input schema only needs to describe what's specific to it.

use clinflow_core::error::{CoreError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub(crate) fn parse_input<T: DeserializeOwned>(inputs: Value, tool_name: &str) -> Result<T> {
    serde_json::from_value(inputs).map_err(|e| CoreError::validation(format!("{tool_name}: {e}")))
}

pub(crate) fn to_output<T: Serialize>(tool_name: &str, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| CoreError::tool(tool_name, e.to_string()))
}
