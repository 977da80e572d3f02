// Authorization is represented as a pure predicate the HTTP layer calls
// before an operation, not as a concern this crate resolves itself — the
// full user/project/dataset-grant model is out of scope here.
// `AuthContext` is the seam a caller wires up; nothing in this crate
// constructs one.

/// A resolved caller identity, able to answer "is this dataset visible to
/// you" without reaching back into a request or a database itself.
pub trait AuthContext: Send + Sync {
    fn user_id(&self) -> &str;

    /// Whether this caller may read or write the named dataset.
    fn can_access_dataset(&self, dataset_name: &str) -> bool;
}

/// The only `AuthContext` this workspace constructs: every dataset is
/// visible to everyone. Stands in for a real grant model, so callers that
/// need actual authorization have a seam to replace this at, rather than
/// `clinflow-api` hardcoding "no auth" into every handler.
#[derive(Debug, Clone, Default)]
pub struct AllowAllContext;

impl AuthContext for AllowAllContext {
    fn user_id(&self) -> &str {
        "anonymous"
    }

    fn can_access_dataset(&self, _dataset_name: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_context_permits_any_dataset() {
        let ctx = AllowAllContext;
        assert!(ctx.can_access_dataset("anything"));
        assert_eq!(ctx.user_id(), "anonymous");
    }
}
