// The workflow agent set: seven stateless, typed-input/output agents plus
// Clarifier (routable) and OutputDefinition (library function, not wired
// into the orchestrator's decision enum). Every agent holds only
// configuration and never propagates an error to its caller — failures are
// encoded in the output type itself.

mod chunk_operator;
mod clarifier;
mod editor;
mod generator;
mod output_definition;
mod prompt_filler;
mod summarizer;
mod validator;

pub use chunk_operator::{ChunkOperation, ChunkOperatorAgent, ChunkOperatorInput, ChunkOperatorOutput};
pub use clarifier::{ClarifierAgent, ClarifierInput, ClarifierOutput};
pub use editor::{EditorAgent, EditorInput, EditorOutput};
pub use generator::{GeneratorAgent, GeneratorInput, GeneratorOutput, PatientContext};
pub use output_definition::{OutputDefinitionAgent, OutputDefinitionInput, OutputDefinitionOutput};
pub use prompt_filler::{PromptFillerAgent, PromptFillerInput, PromptFillerOutput};
pub use summarizer::{SummarizerAgent, SummarizerInput, SummarizerOutput};
pub use validator::{ValidatorAgent, ValidatorInput, ValidatorOutput};

use std::path::{Path, PathBuf};

/// Loads an agent's system prompt from an on-disk override, falling back to
/// the compiled-in default when no override is set or the file is missing.
pub(crate) fn load_prompt(override_path: &Option<PathBuf>, default: &str) -> String {
    override_path
        .as_deref()
        .and_then(|p: &Path| std::fs::read_to_string(p).ok())
        .unwrap_or_else(|| default.to_string())
}
