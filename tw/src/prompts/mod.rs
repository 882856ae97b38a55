//! Prompt catalog
//!
//! Prompts are opaque strings keyed by id. The embedded defaults can be
//! overridden per id by dropping `<id>.md` files into a directory; rendering
//! substitutes `{{key}}` placeholders.

mod embedded;

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

/// Known prompt ids, in workflow order.
pub const PROMPT_IDS: &[&str] = &[
    "mode_selection",
    "chat",
    "context_enrichment",
    "todo_planning",
    "server_selection",
    "tool_planning",
    "verification",
    "replan",
    "final_summary",
    "validation_safety",
    "dev_gate",
];

/// Catalog of prompt texts keyed by id.
pub struct PromptCatalog {
    prompts: HashMap<String, String>,
}

impl PromptCatalog {
    /// The embedded defaults.
    pub fn embedded() -> Self {
        let mut prompts = HashMap::new();
        prompts.insert("mode_selection".into(), embedded::MODE_SELECTION.into());
        prompts.insert("chat".into(), embedded::CHAT.into());
        prompts.insert("context_enrichment".into(), embedded::CONTEXT_ENRICHMENT.into());
        prompts.insert("todo_planning".into(), embedded::TODO_PLANNING.into());
        prompts.insert("server_selection".into(), embedded::SERVER_SELECTION.into());
        prompts.insert("tool_planning".into(), embedded::TOOL_PLANNING.into());
        prompts.insert("verification".into(), embedded::VERIFICATION.into());
        prompts.insert("replan".into(), embedded::REPLAN.into());
        prompts.insert("final_summary".into(), embedded::FINAL_SUMMARY.into());
        prompts.insert("validation_safety".into(), embedded::VALIDATION_SAFETY.into());
        prompts.insert("dev_gate".into(), embedded::DEV_GATE.into());
        Self { prompts }
    }

    /// Embedded defaults plus any `<id>.md` overrides found in `dir`.
    pub fn with_overrides(dir: impl AsRef<Path>) -> Self {
        let mut catalog = Self::embedded();
        let dir = dir.as_ref();
        if !dir.is_dir() {
            debug!(?dir, "prompts: no override directory");
            return catalog;
        }

        for id in PROMPT_IDS {
            let path = dir.join(format!("{id}.md"));
            if let Ok(text) = std::fs::read_to_string(&path) {
                info!(id, path = %path.display(), "prompts: loaded override");
                catalog.prompts.insert((*id).to_string(), text);
            }
        }
        catalog
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.prompts.get(id).map(String::as_str)
    }

    /// Render a prompt, replacing each `{{key}}` with its value. Unknown
    /// placeholders are left in place; unknown ids yield `None`.
    pub fn render(&self, id: &str, values: &[(&str, &str)]) -> Option<String> {
        let mut text = self.get(id)?.to_string();
        for (key, value) in values {
            text = text.replace(&format!("{{{{{key}}}}}"), value);
        }
        Some(text)
    }
}

impl Default for PromptCatalog {
    fn default() -> Self {
        Self::embedded()
    }
}
