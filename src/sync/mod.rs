pub mod create;
pub mod dates;
pub mod relations;
pub mod tags;

#[cfg(test)]
pub mod testing;

use serde::Serialize;

/// Work item types whose children roll dates up, in pass order.
pub const DEFAULT_PARENT_TYPES: [&str; 2] = ["Product Backlog Item", "Feature"];

/// Options controlling a sync pass.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum number of in-flight work item fetches.
    pub concurrency: usize,
    /// Parent work item types the date pass walks, in order.
    pub work_item_types: Vec<String>,
}

impl SyncOptions {
    /// Concurrency clamped to at least one permit.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            work_item_types: DEFAULT_PARENT_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Report returned after a sync pass completes.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub scope: String,
    pub status: SyncStatus,
    pub items_seen: u64,
    pub items_updated: u64,
    pub items_failed: u64,
    pub error: Option<String>,
}

impl SyncReport {
    /// Create a SyncReport with the appropriate status derived from counts.
    pub fn from_counts(scope: String, items_seen: u64, items_updated: u64, items_failed: u64) -> Self {
        let status = if items_failed == 0 {
            SyncStatus::Success
        } else if items_updated > 0 || items_seen > items_failed {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::Failed
        };
        let error = if items_failed > 0 {
            Some(format!("{items_failed} items failed"))
        } else {
            None
        };
        Self {
            scope,
            status,
            items_seen,
            items_updated,
            items_failed,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failed,
}

/// Progress callbacks emitted while a pass runs. All methods default to
/// no-ops so implementors override only what they surface.
pub trait SyncProgress: Send + Sync {
    /// A query resolved to `count` matching work items.
    fn on_items_received(&self, _scope: &str, _count: usize) {}

    /// Child dates were folded into per-parent spans.
    fn on_spans_computed(&self, _scope: &str, _starts: usize, _targets: usize) {}

    /// One work item was updated on the remote side.
    fn on_item_updated(&self, _scope: &str, _id: u64) {}
}

/// Progress sink that discards every callback.
pub struct NoopProgress;

impl SyncProgress for NoopProgress {}
