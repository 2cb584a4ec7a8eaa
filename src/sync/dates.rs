use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::client::ops::{self, PatchOp, PARENT_FIELD, START_DATE_FIELD, TARGET_DATE_FIELD};
use crate::client::WorkItemStore;
use crate::error::Result;
use crate::sync::{SyncOptions, SyncProgress, SyncReport};

/// Fields requested when fetching one child work item.
const DATE_FIELDS: [&str; 4] = [
    "System.WorkItemType",
    START_DATE_FIELD,
    TARGET_DATE_FIELD,
    PARENT_FIELD,
];

fn scope_query(project: &str, work_item_type: &str) -> String {
    format!(
        "Select [System.Id], [System.WorkItemType], [Start Date], [Target Date], [System.Parent] \
         From WorkItems Where [System.TeamProject] = '{project}' \
         AND [System.WorkItemType] = '{work_item_type}'"
    )
}

/// Scheduling facts extracted from one work item's field payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItemDates {
    pub start: Option<DateTime<Utc>>,
    pub target: Option<DateTime<Utc>>,
    pub parent: Option<u64>,
}

impl WorkItemDates {
    /// Read the scheduling fields out of a detail payload. A date field that
    /// is missing or does not parse reads as absent; each date is decoded
    /// independently of the other. A missing parent id is logged, since such
    /// an item can never contribute to a rollup.
    pub fn from_fields(id: u64, fields: &Map<String, Value>) -> Self {
        let start = parse_date_field(fields.get(START_DATE_FIELD));
        let target = parse_date_field(fields.get(TARGET_DATE_FIELD));
        let parent = fields.get(PARENT_FIELD).and_then(Value::as_u64);
        if parent.is_none() {
            log::warn!("Work item {id} has no valid parent id");
        }
        Self {
            start,
            target,
            parent,
        }
    }
}

fn parse_date_field(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let text = value?.as_str()?;
    match DateTime::parse_from_rfc3339(text) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(e) => {
            log::debug!("Ignoring unparseable date value {text:?}: {e}");
            None
        }
    }
}

/// Per-parent rollup of child scheduling dates: the earliest start and the
/// latest target contributed by any child.
///
/// Both maps update through the entry API, which holds the key's shard for
/// the duration of the merge. Folds from concurrently running fetch tasks
/// therefore compose without lost updates, and the result is independent of
/// fold order.
#[derive(Debug, Default)]
pub struct DateSpans {
    earliest_start: DashMap<u64, DateTime<Utc>>,
    latest_target: DashMap<u64, DateTime<Utc>>,
}

impl DateSpans {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one child's dates into its parent's span. A record without a
    /// parent id contributes nothing, as does a date the record lacks.
    pub fn fold(&self, info: &WorkItemDates) {
        let Some(parent) = info.parent else {
            return;
        };
        if let Some(start) = info.start {
            self.earliest_start
                .entry(parent)
                .and_modify(|current| {
                    if start < *current {
                        *current = start;
                    }
                })
                .or_insert(start);
        }
        if let Some(target) = info.target {
            self.latest_target
                .entry(parent)
                .and_modify(|current| {
                    if target > *current {
                        *current = target;
                    }
                })
                .or_insert(target);
        }
    }

    pub fn start_of(&self, parent: u64) -> Option<DateTime<Utc>> {
        self.earliest_start.get(&parent).map(|entry| *entry.value())
    }

    pub fn target_of(&self, parent: u64) -> Option<DateTime<Utc>> {
        self.latest_target.get(&parent).map(|entry| *entry.value())
    }

    pub fn start_count(&self) -> usize {
        self.earliest_start.len()
    }

    pub fn target_count(&self) -> usize {
        self.latest_target.len()
    }

    /// Union of parent ids present in either map, ascending. Sorting keeps
    /// the patch order stable between runs over the same input.
    pub fn parent_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.earliest_start.iter().map(|entry| *entry.key()).collect();
        ids.extend(self.latest_target.iter().map(|entry| *entry.key()));
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Build the patch for one parent: an add operation per span field actually
/// present. A parent with only one aggregated field gets a one-op patch.
pub fn span_patch(start: Option<DateTime<Utc>>, target: Option<DateTime<Utc>>) -> Vec<PatchOp> {
    let mut patch = Vec::with_capacity(2);
    if let Some(start) = start {
        patch.push(PatchOp::add_field(START_DATE_FIELD, ops::format_date(start)));
    }
    if let Some(target) = target {
        patch.push(PatchOp::add_field(TARGET_DATE_FIELD, ops::format_date(target)));
    }
    patch
}

/// Roll child dates up onto parents for every configured work item type, in
/// order. The passes run strictly sequentially; a query failure in one pass
/// propagates and the remaining passes are not attempted.
pub async fn sync_dates<S>(
    store: &S,
    project: &str,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> Result<Vec<SyncReport>>
where
    S: WorkItemStore + Clone + 'static,
{
    let mut reports = Vec::with_capacity(options.work_item_types.len());
    for work_item_type in &options.work_item_types {
        reports.push(sync_dates_scope(store, project, work_item_type, options, progress).await?);
    }
    Ok(reports)
}

/// One `(project, work item type)` pass: query the scope, fetch each item's
/// scheduling fields concurrently, fold them into per-parent spans, then
/// patch every parent that accumulated at least one date.
///
/// A failed item fetch is logged and excluded from aggregation; a failed
/// parent patch is logged and skipped. Only a query failure aborts the pass.
pub async fn sync_dates_scope<S>(
    store: &S,
    project: &str,
    work_item_type: &str,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> Result<SyncReport>
where
    S: WorkItemStore + Clone + 'static,
{
    let response = store.query(&scope_query(project, work_item_type)).await?;
    let items = response.work_items;
    log::info!(
        "Received {} work items of the type {work_item_type}",
        items.len()
    );
    progress.on_items_received(work_item_type, items.len());

    let spans = Arc::new(DateSpans::new());
    let semaphore = Arc::new(Semaphore::new(options.effective_concurrency()));
    let mut fetches: JoinSet<bool> = JoinSet::new();

    for item in &items {
        let id = item.id;
        let store = store.clone();
        let spans = Arc::clone(&spans);
        let semaphore = Arc::clone(&semaphore);
        fetches.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return false,
            };
            match store.work_item(id, &DATE_FIELDS).await {
                Ok(Some(detail)) => {
                    spans.fold(&WorkItemDates::from_fields(detail.id, &detail.fields));
                    true
                }
                Ok(None) => {
                    log::warn!("Cannot get details for work item {id}");
                    false
                }
                Err(e) => {
                    log::warn!("Failed to fetch work item {id}: {e}");
                    false
                }
            }
        });
    }

    let mut fetch_failures: u64 = 0;
    while let Some(joined) = fetches.join_next().await {
        match joined {
            Ok(true) => {}
            Ok(false) => fetch_failures += 1,
            Err(e) => {
                log::warn!("Fetch task did not complete: {e}");
                fetch_failures += 1;
            }
        }
    }

    log::info!(
        "Computed {} start dates, and {} target dates for work items",
        spans.start_count(),
        spans.target_count()
    );
    progress.on_spans_computed(work_item_type, spans.start_count(), spans.target_count());

    let mut updated: u64 = 0;
    let mut patch_failures: u64 = 0;
    for parent_id in spans.parent_ids() {
        let patch = span_patch(spans.start_of(parent_id), spans.target_of(parent_id));
        match store.update_fields(parent_id, &patch).await {
            Ok(()) => {
                updated += 1;
                progress.on_item_updated(work_item_type, parent_id);
            }
            Err(e) => {
                log::error!("Cannot patch the work item {parent_id}: {e}");
                patch_failures += 1;
            }
        }
    }
    log::info!("Updated {updated} work items");

    Ok(SyncReport::from_counts(
        work_item_type.to_string(),
        items.len() as u64,
        updated,
        fetch_failures + patch_failures,
    ))
}
