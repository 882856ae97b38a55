//! The ordered todo list driving the item loop
//!
//! A `Todo` is created once by TODO_PLANNING and mutated only by the state
//! machine: item selection, status moves, and REPLAN insertions all go
//! through here so the dependency invariants live in one place.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::item::{DEFAULT_BLOCKED_CHECK_LIMIT, Item, ItemStatus};

/// Why no item was selected by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// Every item reached a terminal status.
    AllSettled,
    /// Non-terminal items exist but none is currently eligible.
    NoneEligible,
}

/// Ordered collection of items for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Todo {
    items: Vec<Item>,
}

impl Todo {
    pub fn new(items: Vec<Item>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// True when a dependency id exists and is `completed`.
    fn dependency_satisfied(&self, dep_id: &str) -> bool {
        self.get(dep_id).is_some_and(|i| i.status == ItemStatus::Completed)
    }

    /// True when a dependency can never become `completed`: it is missing or
    /// already ended in a non-completed terminal state.
    fn dependency_dead(&self, dep_id: &str) -> bool {
        match self.get(dep_id) {
            None => true,
            Some(item) => item.status.is_terminal() && item.status != ItemStatus::Completed,
        }
    }

    /// Select the next runnable item id under the ITEM_LOOP policy.
    ///
    /// Walks items in order. Terminal items are passed over. A pending item
    /// whose dependencies are all completed is selected. A pending item with
    /// a dead dependency is skipped immediately; one with merely-unsatisfied
    /// dependencies gets its blocked counter bumped and is force-skipped at
    /// the limit to break cycles.
    pub fn select_next(&mut self, blocked_limit: u32) -> Result<String, SelectionOutcome> {
        let ids: Vec<String> = self.items.iter().map(|i| i.id.clone()).collect();
        let mut saw_open = false;

        for id in ids {
            let status = self.get(&id).map(|i| i.status);
            if !matches!(status, Some(ItemStatus::Pending)) {
                if matches!(status, Some(ItemStatus::InProgress)) {
                    saw_open = true;
                }
                continue;
            }
            saw_open = true;

            let deps: Vec<String> = self
                .get(&id)
                .map(|i| i.dependencies.iter().cloned().collect())
                .unwrap_or_default();

            if deps.iter().any(|d| self.dependency_dead(d)) {
                debug!(item_id = %id, "select_next: dependency can never complete, skipping");
                if let Some(item) = self.get_mut(&id) {
                    item.skip("dependency did not complete");
                }
                continue;
            }

            if deps.iter().all(|d| self.dependency_satisfied(d)) {
                return Ok(id);
            }

            // Blocked: count the check and break cycles at the limit
            let Some(item) = self.get_mut(&id) else { continue };
            item.blocked_check_count += 1;
            debug!(
                item_id = %id,
                blocked_check_count = item.blocked_check_count,
                "select_next: dependencies unsatisfied"
            );
            if item.blocked_check_count >= blocked_limit {
                item.skip("blocked too many times");
            }
        }

        if saw_open && self.items.iter().any(|i| !i.status.is_terminal()) {
            Err(SelectionOutcome::NoneEligible)
        } else {
            Err(SelectionOutcome::AllSettled)
        }
    }

    /// Select with the default blocked-check limit.
    pub fn select_next_default(&mut self) -> Result<String, SelectionOutcome> {
        self.select_next(DEFAULT_BLOCKED_CHECK_LIMIT)
    }

    /// Replace a failing item with follow-up items produced by REPLAN.
    ///
    /// The parent is marked `replanned`, the children are inserted directly
    /// after it carrying `replanned_from`, and any item that depended on the
    /// parent now depends on the last child so the ordering intent survives.
    pub fn replan(&mut self, parent_id: &str, mut children: Vec<Item>) -> bool {
        let Some(pos) = self.items.iter().position(|i| i.id == parent_id) else {
            return false;
        };
        if children.is_empty() {
            return false;
        }
        if !self.items[pos].set_status(ItemStatus::Replanned) {
            return false;
        }

        for child in &mut children {
            child.replanned_from = Some(parent_id.to_string());
        }
        let last_child_id = children.last().map(|c| c.id.clone());

        let parent_id_owned = parent_id.to_string();
        if let Some(last) = last_child_id {
            for item in &mut self.items {
                if item.dependencies.remove(&parent_id_owned) {
                    item.dependencies.insert(last.clone());
                }
            }
        }

        let tail = self.items.split_off(pos + 1);
        self.items.extend(children);
        self.items.extend(tail);
        true
    }

    /// Count items per status, for the summary handler.
    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for item in &self.items {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::InProgress => counts.in_progress += 1,
                ItemStatus::Completed => counts.completed += 1,
                ItemStatus::Failed => counts.failed += 1,
                ItemStatus::Skipped => counts.skipped += 1,
                ItemStatus::Replanned => counts.replanned += 1,
            }
        }
        counts
    }

    /// True when every item reached a terminal status.
    pub fn all_settled(&self) -> bool {
        self.items.iter().all(|i| i.status.is_terminal())
    }
}

/// Item tallies for the final summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub replanned: usize,
}
