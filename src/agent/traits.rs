//! Prompt composition traits for the sales assistant.

/// A single section of the assistant instructions (identity, rules, catalog, history).
pub trait PromptSection: Send + Sync {
    fn section_name(&self) -> &str;
    fn render(&self) -> String;
    /// Lower renders first.
    fn priority(&self) -> i32 {
        0
    }
}
