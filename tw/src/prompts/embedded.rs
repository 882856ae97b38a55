//! Embedded prompt texts
//!
//! Compiled-in defaults, used when no override file exists. Placeholders use
//! `{{key}}` and are substituted by the catalog at render time. The workflow
//! treats all of these as opaque strings keyed by id.

/// Decide how to treat an incoming message.
pub const MODE_SELECTION: &str = r#"You are the mode selector of a task orchestrator.
Classify the user's message into exactly one mode:

- "chat": small talk or a question answerable directly, no tools needed
- "task": a request that requires planning and executing tool calls
- "dev": an explicit request for developer/diagnostic mode

Answer with a JSON object: {"mode": "chat" | "task" | "dev"}

User message:
{{message}}
"#;

/// Direct conversational reply.
pub const CHAT: &str = r#"You are a helpful assistant embedded in a task orchestrator.
Reply to the user's message directly and concisely. Do not mention tools.

User message:
{{message}}
"#;

/// Pre-planning analysis of the request.
pub const CONTEXT_ENRICHMENT: &str = r#"Analyze the user's request before planning.
Summarize in a short paragraph: the goal, constraints you can infer, and
anything ambiguous. Recent tool activity is included for context.

User message:
{{message}}

{{history}}
"#;

/// Break the request into ordered items.
pub const TODO_PLANNING: &str = r#"You are the planner of a task orchestrator.
Break the user's request into a short ordered list of work items. Items
should be as independent as possible; use dependencies (indices into the
list, 0-based) only where ordering is required.

Answer with a JSON object:
{"items": [{"action": "...", "dependencies": [0, 1]}]}

Analysis:
{{analysis}}

User message:
{{message}}
"#;

/// Pick the servers able to carry out one item.
pub const SERVER_SELECTION: &str = r#"Select the MCP servers needed for this work item.
Choose only from the servers listed; prefer the smallest sufficient set.

Answer with a JSON object: {"servers": ["name", ...]}

Available servers and their tools:
{{servers}}

Work item:
{{action}}
"#;

/// Plan the concrete tool calls for one item.
pub const TOOL_PLANNING: &str = r#"You are the executor of a task orchestrator.
Plan the exact tool calls for this work item. Use only tools from the
catalog below, with parameters matching each tool's input schema. Keep the
plan minimal: the fewest calls that complete the item.

Answer with a JSON object:
{"tool_calls": [{"server": "...", "tool": "...", "parameters": {...}}],
 "tts": ["short spoken progress phrase", ...]}
("tts" is optional: one short phrase per notable step, for voice output.)

Tool catalog:
{{catalog}}

{{history}}

Work item:
{{action}}
"#;

/// Judge whether the executed calls completed the item.
pub const VERIFICATION: &str = r#"You are the verifier of a task orchestrator.
Given a work item and the results of the tool calls executed for it, judge
whether the item is genuinely complete.

Answer with a JSON object: {"verified": true | false, "explanation": "..."}

Work item:
{{action}}

Execution results:
{{results}}
"#;

/// Decide what to do about a failed item.
pub const REPLAN: &str = r#"A work item failed verification. Decide how to proceed:

- "retry": the same plan is likely to work on a second attempt
- "skip": the item is not essential; continue without it
- "replace": supply new items that achieve the goal differently

Answer with a JSON object:
{"decision": "retry" | "skip" | "replace", "items": [{"action": "..."}]}
("items" is required only for "replace".)

Work item:
{{action}}

Failure:
{{failure}}
"#;

/// Wrap up the run for the user.
pub const FINAL_SUMMARY: &str = r#"Summarize this task run for the user in a short paragraph.
Mention what was accomplished, what was skipped or failed, and anything the
user should follow up on. Be plain and concrete.

User request:
{{message}}

Item outcomes:
{{outcomes}}
"#;

/// Optional safety review of a planned batch (used by the LLM validator).
pub const VALIDATION_SAFETY: &str = r#"You review planned tool calls before they execute.
Flag anything destructive, irreversible, or outside the scope of the user's
request. Approve everything else.
"#;

/// Gate for developer mode.
pub const DEV_GATE: &str = r#"Developer mode is password-protected. Reply to the user asking
for the intervention password, without revealing what it is.
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_nonempty() {
        for text in [
            MODE_SELECTION,
            CHAT,
            CONTEXT_ENRICHMENT,
            TODO_PLANNING,
            SERVER_SELECTION,
            TOOL_PLANNING,
            VERIFICATION,
            REPLAN,
            FINAL_SUMMARY,
            VALIDATION_SAFETY,
            DEV_GATE,
        ] {
            assert!(!text.trim().is_empty());
        }
    }

    #[test]
    fn test_json_prompts_name_their_shape() {
        assert!(MODE_SELECTION.contains(r#""mode""#));
        assert!(TODO_PLANNING.contains(r#""items""#));
        assert!(TOOL_PLANNING.contains(r#""tool_calls""#));
        assert!(VERIFICATION.contains(r#""verified""#));
        assert!(REPLAN.contains(r#""decision""#));
    }
}
