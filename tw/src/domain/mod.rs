//! Core domain types: tool calls, items, todos
//!
//! These are plain data with the invariants the state machine relies on;
//! no I/O happens here.

mod item;
mod todo;
mod tool_call;

pub use item::{
    DEFAULT_BLOCKED_CHECK_LIMIT, DEFAULT_MAX_ATTEMPTS, ExecutionRecord, Item, ItemStatus, ToolOutcome,
    VerificationRecord,
};
pub use todo::{SelectionOutcome, StatusCounts, Todo};
pub use tool_call::{
    CANONICAL_SEPARATOR, ToolCall, WIRE_SEPARATOR, denormalize, is_canonical, normalize, short_name,
};
